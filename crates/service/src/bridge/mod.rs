//! Bridges: the iteration engine between the HTTP layer and one
//! accessor/resolver pair.
//!
//! A bridge owns the plugin pair for the duration of one request and walks
//! a strict lifecycle: `begin_iteration`, then `get_next` or `set_next`
//! until exhaustion, then `end_iteration` exactly once. `end_iteration`
//! always runs, even after a failure, so sources get closed; a close error
//! after an iteration error is logged and swallowed, the iteration error
//! stays the one the caller sees.

mod read;
mod sampling;
mod write;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_api::io::RecordBuffer;
use causeway_api::{Accessor, RequestContext, RequestType, Resolver};
use causeway_error::{CausewayError, ErrorCode, Result};

pub use read::ReadBridge;
pub use sampling::SamplingReadBridge;
pub use write::WriteBridge;

/// Lifecycle position of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Iterating,
    Done,
}

impl BridgeState {
    fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Created => "created",
            BridgeState::Iterating => "iterating",
            BridgeState::Done => "done",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request's record iteration over an accessor/resolver pair.
#[async_trait]
pub trait Bridge: Send {
    /// Open the underlying source. `Ok(false)` means there is nothing to
    /// iterate and the caller should proceed straight to `end_iteration`.
    async fn begin_iteration(&mut self) -> Result<bool>;

    /// Next encoded record for the response body, `None` on exhaustion.
    /// Read bridges only.
    async fn get_next(&mut self) -> Result<Option<Bytes>>;

    /// Consume one record from the request body and persist it. `Ok(false)`
    /// on a clean end of input. Write bridges only.
    async fn set_next(&mut self, input: &mut RecordBuffer) -> Result<bool>;

    /// Close the underlying source. Safe to call exactly once in every
    /// outcome, including after errors and after `begin_iteration` returned
    /// `false`.
    async fn end_iteration(&mut self) -> Result<()>;

    /// Whether this bridge may stream concurrently with others.
    fn is_thread_safe(&self) -> bool;
}

/// Pick the bridge for a parsed request: write requests get a
/// [`WriteBridge`], read requests a [`ReadBridge`], wrapped in a
/// [`SamplingReadBridge`] when the request asks for sampled statistics.
pub fn new_bridge(
    context: Arc<RequestContext>,
    accessor: Box<dyn Accessor>,
    resolver: Box<dyn Resolver>,
) -> Result<Box<dyn Bridge>> {
    let ratio = context.stats_sample_ratio.unwrap_or(0.0);
    match context.request_type {
        RequestType::Write => Ok(Box::new(WriteBridge::new(context, accessor, resolver))),
        RequestType::Read if ratio > 0.0 => Ok(Box::new(SamplingReadBridge::new(
            ReadBridge::new(context, accessor, resolver),
            ratio,
        ))),
        RequestType::Read => Ok(Box::new(ReadBridge::new(context, accessor, resolver))),
        RequestType::Enumerate => Err(CausewayError::new(
            ErrorCode::UnsupportedOperation,
            "no bridge for enumerate requests",
        )),
    }
}

/// Override from the request wins; otherwise a bridge is only as thread
/// safe as both of its plugins.
pub(crate) fn effective_thread_safety(
    context: &RequestContext,
    accessor: &dyn Accessor,
    resolver: &dyn Resolver,
) -> bool {
    let computed = accessor.is_thread_safe() && resolver.is_thread_safe();
    let effective = context.thread_safe_override.unwrap_or(computed);
    tracing::debug!(target: "bridge", computed, effective, "thread safety evaluated");
    effective
}

pub(crate) fn wrong_state(operation: &str, state: BridgeState) -> CausewayError {
    CausewayError::new(
        ErrorCode::PluginLifecycle,
        format!("{} called on a bridge in {} state", operation, state),
    )
}

pub(crate) fn unsupported(operation: &str) -> CausewayError {
    CausewayError::new(
        ErrorCode::UnsupportedOperation,
        format!("Operation {} is not supported", operation),
    )
}
