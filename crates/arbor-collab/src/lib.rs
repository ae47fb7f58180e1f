//! Arbor Collab - The collaboration service.
//!
//! Owns every live-collaboration operation: presence, conversation focus,
//! single-writer node locks, cursors, typing indicators, the aggregated
//! canvas snapshot, the hybrid durable/ephemeral session layer, and the
//! stale-state cleanup routines.
//!
//! Writes go to the ephemeral store and publish exactly one event per state
//! change on the owning canvas's channel. The durable store is written first
//! for hybrid operations and answers lock questions whenever the ephemeral
//! store is unreachable.
//!
//! Operations must stay safe under arbitrary interleaving: several server
//! instances share one ephemeral store, so the only cross-client atomicity
//! primitives are pipelines and conditional create.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod cleanup;
mod codec;
mod cursor;
mod hybrid;
mod locks;
mod presence;
mod service;

pub use hybrid::{HybridCanvasState, LockStatus, StartSessionRequest};
pub use service::{CollabConfig, CollaborationService};
