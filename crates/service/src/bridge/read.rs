//! Read-side bridge: accessor record in, encoded wire record out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_api::io::{encode_record, encode_text_record, RecordBuffer};
use causeway_api::{Accessor, OutputFormat, RequestContext, Resolver};
use causeway_error::{CausewayError, Result};

use super::{effective_thread_safety, unsupported, wrong_state, Bridge, BridgeState};

pub struct ReadBridge {
    context: Arc<RequestContext>,
    accessor: Box<dyn Accessor>,
    resolver: Box<dyn Resolver>,
    state: BridgeState,
    failed: bool,
    records_out: u64,
}

impl ReadBridge {
    pub fn new(
        context: Arc<RequestContext>,
        accessor: Box<dyn Accessor>,
        resolver: Box<dyn Resolver>,
    ) -> Self {
        Self {
            context,
            accessor,
            resolver,
            state: BridgeState::Created,
            failed: false,
            records_out: 0,
        }
    }

    fn fail(&mut self, e: CausewayError) -> CausewayError {
        self.failed = true;
        e
    }
}

#[async_trait]
impl Bridge for ReadBridge {
    async fn begin_iteration(&mut self) -> Result<bool> {
        if self.state != BridgeState::Created {
            return Err(wrong_state("begin_iteration", self.state));
        }
        self.state = BridgeState::Iterating;
        match self.accessor.open_for_read().await {
            Ok(ready) => {
                if !ready {
                    tracing::debug!(target: "bridge", "accessor reports nothing to read");
                }
                Ok(ready)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn get_next(&mut self) -> Result<Option<Bytes>> {
        if self.state != BridgeState::Iterating {
            return Err(wrong_state("get_next", self.state));
        }
        loop {
            let raw = match self.accessor.read_next().await {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.fail(e)),
            };
            let fields = match self.resolver.fields(raw) {
                Ok(fields) => fields,
                Err(e) => return Err(self.fail(e)),
            };
            // a resolver may consume a record without emitting output
            if fields.is_empty() {
                continue;
            }
            let encoded = match self.context.output_format {
                OutputFormat::Binary => encode_record(&fields),
                OutputFormat::Text => encode_text_record(&fields),
            };
            return match encoded {
                Ok(bytes) => {
                    self.records_out += 1;
                    Ok(Some(bytes))
                }
                Err(e) => Err(self.fail(e)),
            };
        }
    }

    async fn set_next(&mut self, _input: &mut RecordBuffer) -> Result<bool> {
        Err(unsupported("set_next"))
    }

    async fn end_iteration(&mut self) -> Result<()> {
        match self.state {
            BridgeState::Done => return Ok(()),
            BridgeState::Created => {
                // nothing was ever opened
                self.state = BridgeState::Done;
                return Ok(());
            }
            BridgeState::Iterating => {}
        }
        self.state = BridgeState::Done;
        tracing::debug!(target: "bridge", records = self.records_out, "read iteration finished");
        match self.accessor.close_for_read().await {
            Ok(()) => Ok(()),
            Err(e) if self.failed => {
                tracing::warn!(
                    target: "bridge",
                    error = %e,
                    "ignoring close failure after iteration error"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_thread_safe(&self) -> bool {
        effective_thread_safety(&self.context, self.accessor.as_ref(), self.resolver.as_ref())
    }
}
