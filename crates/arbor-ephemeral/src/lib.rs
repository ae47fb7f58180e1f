//! Arbor Ephemeral - The volatile, TTL-aware state store.
//!
//! This crate provides:
//! - [`EphemeralStore`]: the capability surface the collaboration service
//!   relies on (conditional create, hashes, sets, scan-safe key matching,
//!   pipelines, pattern pub/sub)
//! - [`MemoryStore`]: an in-process implementation used by every test and by
//!   single-instance development deployments
//! - [`RedisStore`]: the production implementation over a shared Redis
//!   cluster, which is what lets multiple server instances agree on locks
//! - The key scheme shared with existing clusters ([`keys`])
//!
//! Atomicity guarantees are deliberately narrow: pipelines are atomic from
//! the submitting client's point of view, and conditional create
//! (`SET … NX`) is the only cross-client tie-breaker. Everything above this
//! crate is written to those two primitives.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod keys;

mod error;
mod memory;
mod redis_store;
mod store;

pub use error::{EphemeralError, EphemeralResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{EphemeralStore, PipelineOp, PubSubMessage, SetOptions};
