//! Request model shared by the service and the plugins.
//!
//! A [`RequestContext`] is built once by the request parser and is read-only
//! afterwards; it is shared as `Arc<RequestContext>` between the bridge and
//! the plugins bound to the request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use causeway_error::{CausewayError, ErrorCode, Result};
use serde::{Deserialize, Serialize};

use crate::fragment::FragmentMetadata;

/// The kind of work one request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Split the data source into fragments and return them as JSON.
    Enumerate,
    /// Stream records out of one fragment.
    Read,
    /// Stream records into the data source.
    Write,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Enumerate => "enumerate",
            RequestType::Read => "read",
            RequestType::Write => "write",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of the streamed record bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Self-describing length-prefixed records.
    Binary,
    /// Newline-delimited text records.
    Text,
}

impl OutputFormat {
    /// Parse the engine-supplied literal (`BINARY` | `TEXT`, case-insensitive).
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "BINARY" => Ok(OutputFormat::Binary),
            "TEXT" => Ok(OutputFormat::Text),
            _ => Err(CausewayError::new(
                ErrorCode::InvalidOptionValue,
                format!("unsupported output format '{}'. Usage: [BINARY|TEXT]", value),
            )),
        }
    }
}

/// One column of the external table definition, in engine order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Engine type code (numeric, opaque to the core).
    pub type_code: i32,
    pub type_name: String,
    /// Optional type modifiers (e.g. precision/scale), in declared order.
    pub type_modifiers: Vec<i32>,
}

/// Everything one request carries, decoded from the `X-CW-*` headers.
///
/// Immutable after the parser returns it. The only state derived from it
/// that outlives the request is the fragment-cache key.
#[derive(Debug)]
pub struct RequestContext {
    pub request_type: RequestType,

    // identity
    pub transaction_id: String,
    /// Worker segment id; negative means "not a worker segment".
    pub segment_id: i32,
    pub total_segments: i32,
    pub user: String,

    // requesting engine coordinates
    pub host: String,
    pub port: i32,

    // routing
    pub data_source: String,
    pub server_name: String,
    pub profile: Option<String>,
    pub profile_scheme: Option<String>,
    pub fragmenter: Option<String>,
    pub accessor: String,
    pub resolver: String,

    // schema and filtering
    pub columns: Vec<ColumnDescriptor>,
    pub filter: Option<String>,

    // wire format
    pub output_format: OutputFormat,
    /// User-chosen sub-format (e.g. a file format name), if any.
    pub format: Option<String>,

    // free-form options (uppercased keys) and mapped configuration
    pub options: HashMap<String, String>,
    pub configuration: HashMap<String, String>,

    // typed cross-cutting options
    pub thread_safe_override: Option<bool>,
    pub stats_sample_ratio: Option<f32>,
    pub stats_max_fragments: Option<u32>,

    // fragment context (READ/WRITE only)
    pub fragment_index: Option<u32>,
    pub fragment_metadata: Option<Box<dyn FragmentMetadata>>,
    pub last_fragment: bool,
}

impl RequestContext {
    /// Case-insensitive option lookup; keys are stored uppercased.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(&name.to_ascii_uppercase()).map(|s| s.as_str())
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Shared handle for binding into plugins.
    pub fn into_shared(self) -> Arc<RequestContext> {
        Arc::new(self)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_type: RequestType::Read,
            transaction_id: String::new(),
            segment_id: -1,
            total_segments: 0,
            user: String::new(),
            host: String::new(),
            port: 0,
            data_source: String::new(),
            server_name: "default".to_string(),
            profile: None,
            profile_scheme: None,
            fragmenter: None,
            accessor: String::new(),
            resolver: String::new(),
            columns: Vec::new(),
            filter: None,
            output_format: OutputFormat::Binary,
            format: None,
            options: HashMap::new(),
            configuration: HashMap::new(),
            thread_safe_override: None,
            stats_sample_ratio: None,
            stats_max_fragments: None,
            fragment_index: None,
            fragment_metadata: None,
            last_fragment: false,
        }
    }
}
