//! Convenience re-exports.

pub use crate::bus::{BusEvent, BusReceiver, CanvasChangeKind, EventBus};
pub use crate::event::{CanvasEvent, EventEnvelope};
