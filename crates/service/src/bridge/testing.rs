//! Recording plugin doubles for bridge tests.
//!
//! Both doubles append every call to a shared log so tests can assert the
//! exact lifecycle order, and both can be armed to fail at a chosen point.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_api::io::{Field, FieldValue};
use causeway_api::{Accessor, Plugin, RawRecord, RequestContext, Resolver};
use causeway_error::{CausewayError, ErrorCode, Result};
use parking_lot::Mutex;

pub(crate) type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub(crate) fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn log_entries(log: &CallLog) -> Vec<&'static str> {
    log.lock().clone()
}

pub(crate) struct RecordingAccessor {
    log: CallLog,
    rows: VecDeque<Bytes>,
    pub written: Arc<Mutex<Vec<Bytes>>>,
    open_result: bool,
    fail_read_at: Option<usize>,
    fail_close: bool,
    reject_writes: bool,
    thread_safe: bool,
    reads: usize,
    initialized: bool,
}

impl RecordingAccessor {
    pub fn with_rows(log: CallLog, rows: &[&str]) -> Self {
        Self {
            log,
            rows: rows.iter().map(|r| Bytes::from(r.to_string())).collect(),
            written: Arc::new(Mutex::new(Vec::new())),
            open_result: true,
            fail_read_at: None,
            fail_close: false,
            reject_writes: false,
            thread_safe: true,
            reads: 0,
            initialized: false,
        }
    }

    /// `open_for_read` reports nothing to read.
    pub fn not_ready(mut self) -> Self {
        self.open_result = false;
        self
    }

    /// The n-th `read_next` call (1-based) fails.
    pub fn failing_read_at(mut self, call: usize) -> Self {
        self.fail_read_at = Some(call);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub fn not_thread_safe(mut self) -> Self {
        self.thread_safe = false;
        self
    }
}

impl Plugin for RecordingAccessor {
    fn bind(&mut self, _context: Arc<RequestContext>) {}

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

#[async_trait]
impl Accessor for RecordingAccessor {
    async fn open_for_read(&mut self) -> Result<bool> {
        self.log.lock().push("open_read");
        Ok(self.open_result)
    }

    async fn read_next(&mut self) -> Result<Option<RawRecord>> {
        self.log.lock().push("read_next");
        self.reads += 1;
        if self.fail_read_at == Some(self.reads) {
            return Err(CausewayError::new(
                ErrorCode::IterationFailure,
                format!("accessor failed on record {}", self.reads),
            ));
        }
        Ok(self.rows.pop_front().map(RawRecord::new))
    }

    async fn close_for_read(&mut self) -> Result<()> {
        self.log.lock().push("close_read");
        if self.fail_close {
            return Err(CausewayError::new(
                ErrorCode::IterationFailure,
                "close failed",
            ));
        }
        Ok(())
    }

    async fn open_for_write(&mut self) -> Result<bool> {
        self.log.lock().push("open_write");
        Ok(self.open_result)
    }

    async fn write_next(&mut self, record: RawRecord) -> Result<bool> {
        self.log.lock().push("write_next");
        if self.reject_writes {
            return Ok(false);
        }
        self.written.lock().push(record.data);
        Ok(true)
    }

    async fn close_for_write(&mut self) -> Result<()> {
        self.log.lock().push("close_write");
        if self.fail_close {
            return Err(CausewayError::new(
                ErrorCode::IterationFailure,
                "close failed",
            ));
        }
        Ok(())
    }
}

pub(crate) struct RecordingResolver {
    log: CallLog,
    skip_first: usize,
    seen: usize,
    thread_safe: bool,
    initialized: bool,
}

impl RecordingResolver {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            skip_first: 0,
            seen: 0,
            thread_safe: true,
            initialized: false,
        }
    }

    /// Return zero fields for the first `n` records.
    pub fn skipping_first(mut self, n: usize) -> Self {
        self.skip_first = n;
        self
    }

    pub fn not_thread_safe(mut self) -> Self {
        self.thread_safe = false;
        self
    }
}

impl Plugin for RecordingResolver {
    fn bind(&mut self, _context: Arc<RequestContext>) {}

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

impl Resolver for RecordingResolver {
    fn fields(&mut self, record: RawRecord) -> Result<Vec<Field>> {
        self.log.lock().push("fields");
        self.seen += 1;
        if self.seen <= self.skip_first {
            return Ok(Vec::new());
        }
        Ok(vec![Field::text(
            String::from_utf8_lossy(&record.data).into_owned(),
        )])
    }

    fn make_record(&mut self, fields: Vec<Field>) -> Result<RawRecord> {
        self.log.lock().push("make_record");
        match fields.into_iter().next() {
            Some(Field {
                value: FieldValue::Text(text),
                ..
            }) => Ok(RawRecord::new(Bytes::from(text))),
            other => Err(CausewayError::new(
                ErrorCode::IterationFailure,
                format!("expected one text field, got {:?}", other),
            )),
        }
    }
}
