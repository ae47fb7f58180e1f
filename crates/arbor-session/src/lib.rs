//! Arbor Session - The durable session store.
//!
//! This crate provides:
//! - [`EditingSession`]: the authoritative record of who is editing what,
//!   kept in sync with the ephemeral state by the hybrid layer
//! - [`Activity`]: the immutable domain-event record behind the feed and
//!   summary UI
//! - [`SessionStore`] / [`ActivityStore`]: the persistence traits, with an
//!   in-memory implementation for tests and a MongoDB implementation for
//!   production
//!
//! The durable store is authoritative: when the ephemeral store is down,
//! lock questions are answered from here.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod memory;
mod mongo;
mod records;
mod store;

pub use error::{SessionError, SessionResult};
pub use memory::{MemoryActivityStore, MemorySessionStore};
pub use mongo::{MongoActivityStore, MongoSessionStore, connect as connect_mongo};
pub use records::{
    Activity, ActivityFilter, ActivityPriority, ActivityType, EditingSession, EditingTargetKind,
};
pub use store::{ActivityStore, SessionStore};
