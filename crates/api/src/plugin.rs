//! Plugin lifecycle contract.
//!
//! Every plugin is bound to exactly one request: the service calls
//! [`Plugin::bind`] with the shared [`RequestContext`], then
//! [`Plugin::initialize`] exactly once, before any other method. Plugins may
//! read descriptor fields during their own initialization, which is why the
//! bind-then-initialize ordering is part of the contract. Re-initialization
//! is a lifecycle error, never a silent reset.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_error::{CausewayError, ErrorCode, Result};
use serde::Serialize;

use crate::fragment::Fragment;
use crate::io::Field;
use crate::model::RequestContext;

/// One raw record as exchanged between an accessor and a resolver.
///
/// The payload is opaque to the core: an accessor produces whatever byte
/// shape its source yields (a line, a serialized cell group, an encoded
/// row) and the paired resolver knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Option<Bytes>,
    pub data: Bytes,
}

impl RawRecord {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            data: data.into(),
        }
    }

    pub fn with_key(key: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
            data: data.into(),
        }
    }
}

/// Aggregate size statistics over a data source's fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FragmentStats {
    pub total_fragments: u64,
    pub first_fragment_size: u64,
    pub total_size: u64,
}

/// Base contract shared by fragmenters, accessors and resolvers.
pub trait Plugin: Send {
    /// Bind the shared request context. Must happen before `initialize`.
    fn bind(&mut self, context: Arc<RequestContext>);

    /// Called exactly once after `bind`, before any other lifecycle method.
    fn initialize(&mut self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Whether instances of this plugin may run concurrently without
    /// external locking. A static property of the implementation.
    fn is_thread_safe(&self) -> bool {
        true
    }
}

/// Common bind/initialize state, embedded by plugin implementations.
#[derive(Debug, Default)]
pub struct BasePlugin {
    context: Option<Arc<RequestContext>>,
    initialized: bool,
}

impl BasePlugin {
    pub fn bind(&mut self, context: Arc<RequestContext>) {
        self.context = Some(context);
    }

    /// Marks the plugin initialized; rejects double initialization and
    /// initialization before bind.
    pub fn initialize(&mut self) -> Result<()> {
        if self.context.is_none() {
            return Err(CausewayError::new(
                ErrorCode::PluginLifecycle,
                "plugin must be bound to a request context before initialization",
            ));
        }
        if self.initialized {
            return Err(CausewayError::new(
                ErrorCode::PluginLifecycle,
                "plugin is already initialized",
            ));
        }
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The bound request context; lifecycle error if called before `bind`.
    pub fn context(&self) -> Result<&Arc<RequestContext>> {
        self.context.as_ref().ok_or_else(|| {
            CausewayError::new(
                ErrorCode::PluginLifecycle,
                "plugin used before a request context was bound",
            )
        })
    }
}

fn unsupported(operation: &str) -> CausewayError {
    CausewayError::new(
        ErrorCode::UnsupportedOperation,
        format!("Operation {} is not supported", operation),
    )
}

/// Splits a data source into fragments.
#[async_trait]
pub trait Fragmenter: Plugin {
    /// Enumerate the fragments of the bound data source. Expensive for most
    /// sources; results are cached across the segments of one query.
    async fn fragments(&mut self) -> Result<Vec<Fragment>>;

    /// Aggregate size statistics, for sources that can answer cheaply.
    async fn fragment_stats(&mut self) -> Result<FragmentStats> {
        Err(unsupported("fragment_stats"))
    }
}

/// Performs raw reads and writes against the data source for one fragment.
///
/// The write half defaults to "not supported" so read-only connectors only
/// implement the read half; a write request against them fails cleanly at
/// `open_for_write`.
#[async_trait]
pub trait Accessor: Plugin {
    /// Open the fragment for reading. `false` means there is nothing to
    /// read and iteration is skipped entirely.
    async fn open_for_read(&mut self) -> Result<bool>;

    /// Next raw record, or `None` on exhaustion.
    async fn read_next(&mut self) -> Result<Option<RawRecord>>;

    async fn close_for_read(&mut self) -> Result<()>;

    /// Open the data source for writing. `false` means nothing to do.
    async fn open_for_write(&mut self) -> Result<bool> {
        Err(unsupported("open_for_write"))
    }

    /// Persist one record; `false` signals the sink cannot accept more.
    async fn write_next(&mut self, record: RawRecord) -> Result<bool> {
        let _ = record;
        Err(unsupported("write_next"))
    }

    async fn close_for_write(&mut self) -> Result<()> {
        Err(unsupported("close_for_write"))
    }
}

/// Converts between raw source records and wire-format fields.
///
/// Conversion is CPU-bound and synchronous; anything that needs I/O belongs
/// in `initialize` or in the accessor.
pub trait Resolver: Plugin {
    /// Decode one raw record into zero or more wire fields (read path).
    fn fields(&mut self, record: RawRecord) -> Result<Vec<Field>>;

    /// Compose one raw record from decoded wire fields (write path).
    fn make_record(&mut self, fields: Vec<Field>) -> Result<RawRecord>;
}
