//! Arbor Events - Collaboration event payloads and the in-process bus.
//!
//! This crate provides:
//! - The wire envelope (`{ type, data, timestamp }`) published on the
//!   ephemeral store's per-canvas channels
//! - The closed set of canvas event payloads
//! - A broadcast-based in-process bus carrying activity and domain-diff
//!   fan-out from the services to the gateway (one-way dependency; the
//!   services never see the gateway)
//!
//! # Example
//!
//! ```rust
//! use arbor_events::{BusEvent, EventBus};
//! use arbor_core::CanvasId;
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(BusEvent::CanvasChange {
//!     canvas_id: CanvasId::new("c1"),
//!     kind: arbor_events::CanvasChangeKind::NodeCreated,
//!     payload: serde_json::json!({ "nodeId": "n1" }),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! # let _ = event;
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;

pub use bus::{BusEvent, BusReceiver, CanvasChangeKind, DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use event::{
    CanvasEvent, EventEnvelope, LockExpiredPayload, NodeUnlockedPayload, TypingStoppedPayload,
    UserLeftPayload,
};
