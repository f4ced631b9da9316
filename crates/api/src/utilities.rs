//! Small shared helpers used across the parser and the HTTP layer.

use causeway_error::{CausewayError, ErrorCode, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static NON_PRINTABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_:/-]").unwrap());

/// Replace every character outside `[A-Za-z0-9_:/-]` with `.`, so
/// engine-controlled strings (paths, filters) are safe to echo into logs
/// and response bodies.
pub fn mask_non_printables(input: &str) -> String {
    NON_PRINTABLE.replace_all(input, ".").to_string()
}

/// Trailing component of a dotted plugin identifier:
/// `com.example.connectors.DemoAccessor` -> `DemoAccessor`.
pub fn short_name(identifier: &str) -> &str {
    match identifier.rfind('.') {
        Some(dot) => &identifier[dot + 1..],
        None => identifier,
    }
}

/// Strict boolean vocabulary used by option values.
pub fn parse_bool_strict(value: &str) -> Result<bool> {
    match value.to_ascii_uppercase().as_str() {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(CausewayError::new(
            ErrorCode::InvalidOptionValue,
            format!("Illegal boolean value '{}'. Usage: [TRUE|FALSE]", value),
        )),
    }
}

/// Lenient truthiness used only for the header-encoding flag: anything
/// that is not case-insensitive "true" is false.
pub fn is_true_lenient(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Reverse the transport-safe encoding applied to header values:
/// `+` becomes a space, `%XX` becomes the byte `0xXX`. The decoded bytes
/// are interpreted as UTF-8 (lossily, matching the header transcode).
pub fn percent_decode(value: &str) -> Result<String> {
    let raw = value.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let escape_error = || {
                    CausewayError::new(
                        ErrorCode::InvalidRequest,
                        format!("invalid percent-encoding in '{}'", value),
                    )
                };
                if i + 3 > raw.len() {
                    return Err(escape_error());
                }
                let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(escape_error)?;
                out.push(hex);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}
