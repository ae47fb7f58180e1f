//! Arbor Activity - Recording and serving the domain activity feed.
//!
//! External collaborators (node-edit RPC, file pipeline, chat streaming)
//! submit activities here. High-frequency, low-value types coalesce into one
//! record per `(canvas, user, type)` within a short window; everything
//! persists to the durable store and fans out to canvas rooms through the
//! in-process bus. High-priority types additionally raise a notification
//! toast.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod batch;
mod service;

pub use service::{
    ActivityConfig, ActivityInput, ActivityService, ActivitySummary, Recorded, TypeSummary,
    UserActivityCount,
};
