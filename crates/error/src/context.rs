//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis.

use serde::{Deserialize, Serialize};

/// Structured context attached to an error alongside its message.
///
/// Each variant provides specific fields relevant to that error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for CWAY-1001 (MissingProperty)
    MissingProperty { property: String },

    /// Context for CWAY-1002 (ProfileCollision)
    ProfileCollision {
        profile: String,
        colliding_keys: Vec<String>,
    },

    /// Context for CWAY-1003 (InvalidOptionValue)
    InvalidOption {
        option: String,
        value: String,
    },

    /// Context for CWAY-2001/2002 (plugin lookup and handler construction)
    Plugin {
        kind: String,
        name: String,
        available: Vec<String>,
    },

    /// Context for CWAY-3001 (IterationFailure)
    Iteration {
        data_source: String,
        records_processed: u64,
    },

    /// Context for CWAY-4001 (CapacityExceeded)
    Capacity {
        max_concurrent: usize,
        queue_capacity: usize,
    },

    /// Context for CWAY-5001 (configuration errors)
    Config {
        file_path: Option<String>,
        field: Option<String>,
    },
}
