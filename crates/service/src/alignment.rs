//! Record-alignment hint published by the request parser.
//!
//! The requesting engine sends its alignment with every request and plugin
//! code may consult it when laying out binary records. The value is
//! process-wide state with an explicit handle so tests can use a private
//! instance instead of the shared one.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

static PROCESS_HINT: Lazy<AlignmentHint> = Lazy::new(AlignmentHint::new);

/// Handle to one alignment slot. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct AlignmentHint {
    slot: Arc<RwLock<Option<String>>>,
}

impl AlignmentHint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the alignment named by the current request.
    pub fn publish(&self, value: &str) {
        *self.slot.write() = Some(value.to_string());
    }

    /// Most recently published alignment, if any request arrived yet.
    pub fn current(&self) -> Option<String> {
        self.slot.read().clone()
    }

    pub fn reset(&self) {
        *self.slot.write() = None;
    }
}

/// The hint shared by the whole process. The server wires this instance
/// into its parser; plugins read it through the same call.
pub fn process_hint() -> AlignmentHint {
    PROCESS_HINT.clone()
}
