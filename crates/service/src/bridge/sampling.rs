//! Sampling wrapper over a read bridge, used for statistics collection.
//!
//! The engine asks for a sample by sending a ratio in (0, 1]. Selection is
//! deterministic: an accumulator gains `ratio` per record and a record is
//! emitted each time it crosses 1.0, which spreads the kept records evenly
//! across the stream instead of front-loading them.

use async_trait::async_trait;
use bytes::Bytes;
use causeway_api::io::RecordBuffer;
use causeway_error::Result;

use super::{Bridge, ReadBridge};

pub struct SamplingReadBridge {
    inner: ReadBridge,
    ratio: f32,
    carry: f32,
}

impl SamplingReadBridge {
    pub fn new(inner: ReadBridge, ratio: f32) -> Self {
        Self {
            inner,
            ratio: ratio.clamp(0.0, 1.0),
            carry: 0.0,
        }
    }
}

#[async_trait]
impl Bridge for SamplingReadBridge {
    async fn begin_iteration(&mut self) -> Result<bool> {
        self.inner.begin_iteration().await
    }

    async fn get_next(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.inner.get_next().await? {
                None => return Ok(None),
                Some(record) => {
                    self.carry += self.ratio;
                    if self.carry >= 1.0 {
                        self.carry -= 1.0;
                        return Ok(Some(record));
                    }
                }
            }
        }
    }

    async fn set_next(&mut self, input: &mut RecordBuffer) -> Result<bool> {
        self.inner.set_next(input).await
    }

    async fn end_iteration(&mut self) -> Result<()> {
        self.inner.end_iteration().await
    }

    fn is_thread_safe(&self) -> bool {
        self.inner.is_thread_safe()
    }
}
