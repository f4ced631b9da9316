//! Process-wide Prometheus metrics.
//!
//! Every metric registers itself into [`REGISTRY`] on first touch; the
//! `/metrics` endpoint renders whatever has been touched so far.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static FRAGMENTS_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_fragments_requests_total",
        "Total number of fragment enumeration requests served",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static READ_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_read_requests_total",
        "Total number of read streaming requests served",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static WRITE_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_write_requests_total",
        "Total number of write ingestion requests served",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static RECORDS_STREAMED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_records_streamed_total",
        "Total number of records streamed out to read requests",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static RECORDS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_records_written_total",
        "Total number of records accepted from write requests",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static FRAGMENT_CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_fragment_cache_hits_total",
        "Fragment enumerations answered from the cache",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static FRAGMENT_CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_fragment_cache_misses_total",
        "Fragment enumerations that had to run the fragmenter",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static ACTIVE_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_active_requests",
        "Number of requests currently holding a worker slot",
    );
    let gauge = IntGauge::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static REQUESTS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "causeway_requests_rejected_total",
        "Requests turned away because the worker pool was saturated",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> (String, Vec<u8>) {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    // encoding into a Vec cannot fail
    encoder.encode(&metric_families, &mut buffer).ok();
    (encoder.format_type().to_string(), buffer)
}
