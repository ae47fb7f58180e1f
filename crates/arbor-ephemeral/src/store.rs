//! The ephemeral store capability surface.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EphemeralResult;

/// Options for a string write.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Expiry for the key; `None` leaves any existing TTL untouched on
    /// overwrite and stores without expiry on create.
    pub ttl: Option<Duration>,
    /// Write only if the key is absent. This is the single cross-client
    /// tie-breaker for lock acquisition.
    pub create_only_if_absent: bool,
}

impl SetOptions {
    /// Plain write with a TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            create_only_if_absent: false,
        }
    }

    /// Conditional create with a TTL.
    #[must_use]
    pub fn create_with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            create_only_if_absent: true,
        }
    }
}

/// One operation inside a pipelined batch.
///
/// A pipeline executes atomically from the submitting client's point of
/// view; it is not transactional with respect to other clients.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    /// Write a string key.
    SetString {
        /// Target key.
        key: String,
        /// Value to store.
        value: String,
        /// Optional expiry.
        ttl: Option<Duration>,
    },
    /// Write hash fields, optionally stamping a TTL on the whole hash.
    HashSet {
        /// Target key.
        key: String,
        /// Field/value pairs.
        fields: Vec<(String, String)>,
        /// Optional expiry for the hash.
        ttl: Option<Duration>,
    },
    /// Add a member to a set.
    SetAdd {
        /// Target set.
        key: String,
        /// Member to add.
        member: String,
    },
    /// Remove a member from a set.
    SetRemove {
        /// Target set.
        key: String,
        /// Member to remove.
        member: String,
    },
    /// Delete a key of any type.
    Delete {
        /// Target key.
        key: String,
    },
    /// Stamp a TTL on an existing key.
    Expire {
        /// Target key.
        key: String,
        /// New expiry.
        ttl: Duration,
    },
}

/// A message delivered to a pattern subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// The concrete channel the message was published on.
    pub channel: String,
    /// The raw payload.
    pub payload: String,
}

/// The volatile, TTL-aware key/value + pub/sub service.
///
/// All implementations must treat a key whose TTL has lapsed as absent,
/// whatever their physical expiry latency.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a string key.
    async fn get_string(&self, key: &str) -> EphemeralResult<Option<String>>;

    /// Write a string key. Returns `false` when `create_only_if_absent` was
    /// requested and the key already existed (the caller lost the race).
    async fn set_string(&self, key: &str, value: &str, opts: SetOptions) -> EphemeralResult<bool>;

    /// Read one hash field.
    async fn hash_get(&self, key: &str, field: &str) -> EphemeralResult<Option<String>>;

    /// Write one hash field.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> EphemeralResult<()>;

    /// Read a whole hash. Absent keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> EphemeralResult<HashMap<String, String>>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> EphemeralResult<()>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> EphemeralResult<()>;

    /// List a set's members. Absent keys yield an empty list.
    async fn set_members(&self, key: &str) -> EphemeralResult<Vec<String>>;

    /// All live keys matching a `*` glob. Implementations must be scan-safe
    /// on large keyspaces.
    async fn keys_matching(&self, pattern: &str) -> EphemeralResult<Vec<String>>;

    /// Execute a batch of writes atomically from this client's perspective.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> EphemeralResult<()>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> EphemeralResult<()>;

    /// Subscribe to every channel matching a `*` glob. The receiver yields
    /// messages until the store shuts down or the subscriber is dropped.
    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> EphemeralResult<mpsc::Receiver<PubSubMessage>>;

    /// Stamp a TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> EphemeralResult<()>;

    /// Delete a key of any type. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> EphemeralResult<()>;

    /// Whether a key exists (and has not lapsed).
    async fn exists(&self, key: &str) -> EphemeralResult<bool>;

    /// Liveness probe.
    async fn ping(&self) -> EphemeralResult<()>;
}
