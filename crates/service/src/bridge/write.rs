//! Write-side bridge: framed request-body record in, accessor write out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_api::io::{decode_record, decode_text_record, RecordBuffer};
use causeway_api::{Accessor, OutputFormat, RequestContext, Resolver};
use causeway_error::{CausewayError, ErrorCode, Result};

use super::{effective_thread_safety, unsupported, wrong_state, Bridge, BridgeState};

pub struct WriteBridge {
    context: Arc<RequestContext>,
    accessor: Box<dyn Accessor>,
    resolver: Box<dyn Resolver>,
    state: BridgeState,
    failed: bool,
    records_in: u64,
}

impl WriteBridge {
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
            records_in: 0,
        }
    }

    fn fail(&mut self, e: CausewayError) -> CausewayError {
        self.failed = true;
        e
    }
}

#[async_trait]
impl Bridge for WriteBridge {
    async fn begin_iteration(&mut self) -> Result<bool> {
        if self.state != BridgeState::Created {
            return Err(wrong_state("begin_iteration", self.state));
        }
        self.state = BridgeState::Iterating;
        match self.accessor.open_for_write().await {
            Ok(ready) => {
                if !ready {
                    tracing::debug!(target: "bridge", "accessor reports nothing to write");
                }
                Ok(ready)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn get_next(&mut self) -> Result<Option<Bytes>> {
        Err(unsupported("get_next"))
    }

    async fn set_next(&mut self, input: &mut RecordBuffer) -> Result<bool> {
        if self.state != BridgeState::Iterating {
            return Err(wrong_state("set_next", self.state));
        }
        let frame = match self.context.output_format {
            OutputFormat::Binary => input.next_binary_frame().await,
            OutputFormat::Text => input.next_line().await,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(e) => return Err(self.fail(e)),
        };

        let fields = match self.context.output_format {
            OutputFormat::Binary => match decode_record(&frame) {
                Ok(fields) => fields,
                Err(e) => return Err(self.fail(e)),
            },
            OutputFormat::Text => decode_text_record(&frame),
        };
        let record = match self.resolver.make_record(fields) {
            Ok(record) => record,
            Err(e) => return Err(self.fail(e)),
        };
        let accepted = match self.accessor.write_next(record).await {
            Ok(accepted) => accepted,
            Err(e) => return Err(self.fail(e)),
        };
        if !accepted {
            let rejected = CausewayError::new(
                ErrorCode::IterationFailure,
                format!("accessor rejected record {}", self.records_in + 1),
            );
            return Err(self.fail(rejected));
        }
        self.records_in += 1;
        Ok(true)
    }

    async fn end_iteration(&mut self) -> Result<()> {
        match self.state {
            BridgeState::Done => return Ok(()),
            BridgeState::Created => {
                self.state = BridgeState::Done;
                return Ok(());
            }
            BridgeState::Iterating => {}
        }
        self.state = BridgeState::Done;
        tracing::debug!(target: "bridge", records = self.records_in, "write iteration finished");
        match self.accessor.close_for_write().await {
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
