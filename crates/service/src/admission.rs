//! Bounded admission for request handling.
//!
//! Every data request holds one worker slot for its full lifetime,
//! including the streaming phase. When all slots are busy a bounded number
//! of requests may wait in line; beyond that the server fails fast with a
//! capacity error rather than buffering unbounded work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use causeway_error::{CausewayError, ErrorCode, ErrorContext};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::timeout;

use crate::config::WorkerPoolSettings;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("worker pool exhausted and queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },
    #[error("timed out waiting for a worker slot after {0:?}")]
    QueueTimeout(Duration),
    #[error("worker pool is closed")]
    PoolClosed,
}

/// One admitted unit of work. Dropping it returns the slot to the pool.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        crate::metrics::ACTIVE_REQUESTS.inc();
        Self { _permit: permit }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        crate::metrics::ACTIVE_REQUESTS.dec();
    }
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
    max_size: usize,
    queue_capacity: usize,
    queue_timeout: Duration,
}

impl WorkerPool {
    pub fn new(max_size: usize, queue_capacity: usize, queue_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_size)),
            queued: AtomicUsize::new(0),
            max_size,
            queue_capacity,
            queue_timeout,
        }
    }

    pub fn from_config(settings: &WorkerPoolSettings) -> Self {
        Self::new(
            settings.max_size,
            settings.queue_capacity,
            Duration::from_secs(settings.queue_timeout_secs),
        )
    }

    /// Acquire a slot, waiting in the bounded queue when the pool is busy.
    pub async fn acquire(&self) -> Result<WorkerSlot, SlotError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(WorkerSlot::new(permit)),
            Err(TryAcquireError::Closed) => return Err(SlotError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let waiting = self.queued.fetch_add(1, Ordering::AcqRel);
        if waiting >= self.queue_capacity {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(SlotError::QueueFull {
                capacity: self.queue_capacity,
            });
        }

        tracing::debug!(
            target: "admission",
            waiting = waiting + 1,
            capacity = self.queue_capacity,
            "worker pool busy, request queued"
        );
        let outcome = timeout(
            self.queue_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await;
        self.queued.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            Ok(Ok(permit)) => Ok(WorkerSlot::new(permit)),
            Ok(Err(_)) => Err(SlotError::PoolClosed),
            Err(_) => Err(SlotError::QueueTimeout(self.queue_timeout)),
        }
    }

    /// Slots currently held by admitted requests.
    pub fn active_count(&self) -> usize {
        self.max_size - self.permits.available_permits()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The error returned to the requesting engine when admission fails.
    pub fn capacity_error(&self) -> CausewayError {
        CausewayError::new(
            ErrorCode::CapacityExceeded,
            "Causeway server processing capacity exceeded.",
        )
        .with_context(ErrorContext::Capacity {
            max_concurrent: self.max_size,
            queue_capacity: self.queue_capacity,
        })
        .with_hint(format!(
            "Consider increasing worker_pool.max_size (currently {}) and/or \
             worker_pool.queue_capacity (currently {}) in the server configuration",
            self.max_size, self.queue_capacity
        ))
    }
}
