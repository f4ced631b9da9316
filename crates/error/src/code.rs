use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following CWAY-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Request errors (malformed headers, bad option values)
/// - **2000-2999**: Plugin resolution and lifecycle errors
/// - **3000-3999**: Streaming/bridge errors
/// - **4000-4999**: Capacity/admission errors
/// - **5000-5999**: Configuration/Internal errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Request Errors (1000-1999) ===
    /// CWAY-1001: Mandatory request property missing or blank
    MissingProperty = 1001,
    /// CWAY-1002: Explicit plugin option collides with a profile definition
    ProfileCollision = 1002,
    /// CWAY-1003: Option value fails boolean/numeric/format validation
    InvalidOptionValue = 1003,
    /// CWAY-1004: Fragment metadata payload cannot be deserialized
    InvalidFragmentMetadata = 1004,
    /// CWAY-1005: Request malformed in some other way
    InvalidRequest = 1005,

    // === Plugin Errors (2000-2999) ===
    /// CWAY-2001: No plugin registered under the requested identifier
    UnknownPlugin = 2001,
    /// CWAY-2002: Protocol handler could not be constructed
    HandlerConstruction = 2002,
    /// CWAY-2003: Plugin lifecycle misuse (double initialization, use before bind)
    PluginLifecycle = 2003,
    /// CWAY-2004: Operation not supported by the plugin
    UnsupportedOperation = 2004,

    // === Streaming Errors (3000-3999) ===
    /// CWAY-3001: Accessor/resolver failure while iterating records
    IterationFailure = 3001,
    /// CWAY-3002: Client closed the connection mid-stream (benign)
    ClientDisconnect = 3002,
    /// CWAY-3003: Wire record encode/decode failed
    SerializationFailed = 3003,

    // === Capacity Errors (4000-4999) ===
    /// CWAY-4001: Worker pool and queue are saturated
    CapacityExceeded = 4001,

    // === Internal Errors (5000-5999) ===
    /// CWAY-5001: Invalid server configuration
    InvalidConfiguration = 5001,
    /// CWAY-5003: Unexpected internal state
    Internal = 5003,

    /// CWAY-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "CWAY-1001")
    pub fn as_str(&self) -> String {
        format!("CWAY-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Request,
            2000..=2999 => ErrorCategory::Plugin,
            3000..=3999 => ErrorCategory::Streaming,
            4000..=4999 => ErrorCategory::Capacity,
            5000..=5999 => ErrorCategory::Internal,
            _ => ErrorCategory::Internal,
        }
    }

    /// HTTP status the code maps to at the request boundary
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Request => 400,
            ErrorCategory::Capacity => 503,
            ErrorCategory::Plugin | ErrorCategory::Streaming | ErrorCategory::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        // Parse "CWAY-XXXX" format
        let num: u16 = s
            .strip_prefix("CWAY-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::MissingProperty),
            1002 => Ok(Self::ProfileCollision),
            1003 => Ok(Self::InvalidOptionValue),
            1004 => Ok(Self::InvalidFragmentMetadata),
            1005 => Ok(Self::InvalidRequest),
            2001 => Ok(Self::UnknownPlugin),
            2002 => Ok(Self::HandlerConstruction),
            2003 => Ok(Self::PluginLifecycle),
            2004 => Ok(Self::UnsupportedOperation),
            3001 => Ok(Self::IterationFailure),
            3002 => Ok(Self::ClientDisconnect),
            3003 => Ok(Self::SerializationFailed),
            4001 => Ok(Self::CapacityExceeded),
            5001 => Ok(Self::InvalidConfiguration),
            5003 => Ok(Self::Internal),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category for boundary mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Request,
    Plugin,
    Streaming,
    Capacity,
    Internal,
}
