//! Single-flight cache for fragment enumerations.
//!
//! All worker segments of one external scan send the same enumeration
//! request, one per segment, within a short window. The cache collapses
//! those into a single plugin call: the first request runs the fragmenter,
//! concurrent requests for the same key await that same load, and follow-up
//! requests are served from the cached list until it sits idle past its
//! expiry.
//!
//! A failed load is observed by every request already waiting on it and is
//! then dropped from the cache, so the next request retries instead of
//! replaying a stale error.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use causeway_api::utilities::mask_non_printables;
use causeway_api::{Fragment, RequestContext};
use causeway_error::{CausewayError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Clock seam so expiry is testable without sleeping.
pub trait Ticker: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type LoadResult = std::result::Result<Arc<Vec<Fragment>>, CausewayError>;

/// One cache entry. The `OnceCell` is the single-flight point: whichever
/// request gets to initialize it runs the loader, everyone else awaits the
/// stored outcome.
#[derive(Clone)]
struct CacheSlot {
    cell: Arc<OnceCell<LoadResult>>,
    last_access: Arc<Mutex<Instant>>,
}

impl CacheSlot {
    fn new(now: Instant) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            last_access: Arc::new(Mutex::new(now)),
        }
    }

    fn touch(&self, now: Instant) {
        *self.last_access.lock() = now;
    }

    fn expired(&self, now: Instant, idle: Duration) -> bool {
        // an in-flight load is never evicted
        if self.cell.get().is_none() {
            return false;
        }
        now.saturating_duration_since(*self.last_access.lock()) > idle
    }
}

pub struct FragmentCache {
    enabled: bool,
    idle_expiry: Duration,
    ticker: Arc<dyn Ticker>,
    slots: DashMap<String, CacheSlot>,
}

impl FragmentCache {
    pub fn new(enabled: bool, idle_expiry: Duration) -> Self {
        Self::with_ticker(enabled, idle_expiry, Arc::new(SystemTicker))
    }

    pub fn with_ticker(enabled: bool, idle_expiry: Duration, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            enabled,
            idle_expiry,
            ticker,
            slots: DashMap::new(),
        }
    }

    /// Cache key: transaction, data source and filter. Segment id is
    /// deliberately absent so all segments of one scan share the entry.
    pub fn key(context: &RequestContext) -> String {
        format!(
            "{}:{}:{}",
            context.transaction_id,
            context.data_source,
            context.filter.as_deref().unwrap_or_default()
        )
    }

    /// Return the fragment list under `key`, running `loader` at most once
    /// per cache generation. Expired entries are swept on every call.
    pub async fn get_or_enumerate<F, Fut>(&self, key: &str, loader: F) -> Result<Arc<Vec<Fragment>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Fragment>>>,
    {
        if !self.enabled {
            return loader().await.map(Arc::new);
        }

        let now = self.ticker.now();
        self.sweep(now);

        let slot = self
            .slots
            .entry(key.to_string())
            .and_modify(|slot| slot.touch(now))
            .or_insert_with(|| CacheSlot::new(now))
            .clone();
        let resolved = slot.cell.get().is_some();

        let outcome = slot
            .cell
            .get_or_init(|| async {
                crate::metrics::FRAGMENT_CACHE_MISSES.inc();
                tracing::debug!(
                    target: "cache",
                    key = %mask_non_printables(key),
                    "enumerating fragments"
                );
                loader().await.map(Arc::new)
            })
            .await;

        match outcome {
            Ok(fragments) => {
                if resolved {
                    crate::metrics::FRAGMENT_CACHE_HITS.inc();
                    tracing::debug!(
                        target: "cache",
                        key = %mask_non_printables(key),
                        fragments = fragments.len(),
                        "fragment cache hit"
                    );
                }
                Ok(Arc::clone(fragments))
            }
            Err(e) => {
                // drop the failed entry, but only if it is still ours;
                // a retry may have installed a fresh slot already
                self.slots
                    .remove_if(key, |_, current| Arc::ptr_eq(&current.cell, &slot.cell));
                Err(e.clone())
            }
        }
    }

    /// Evict every entry past its idle expiry.
    pub fn clean_up(&self) {
        self.sweep(self.ticker.now());
    }

    fn sweep(&self, now: Instant) {
        self.slots
            .retain(|_, slot| !slot.expired(now, self.idle_expiry));
    }

    /// Entry count, including entries that expired since the last sweep.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
