//! Configuration types for the Arbor server.
//!
//! All types are self-contained; domain crates receive plain values at the
//! boundary. Every struct implements [`Default`] with production defaults so
//! that a bare `[section]` header in TOML produces a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the Arbor server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerSection,
    /// Ephemeral state store (Redis) connection.
    pub ephemeral: EphemeralSection,
    /// Durable session store (MongoDB) connection.
    pub durable: DurableSection,
    /// Presence, lock, cursor, and typing time-to-live knobs.
    pub presence: PresenceSection,
    /// Durable editing-session lifecycle.
    pub sessions: SessionsSection,
    /// Activity batching and retention.
    pub activity: ActivitySection,
    /// Logging level and format.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// TCP port to bind.
    pub port: u16,
    /// Bind address.
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 3001,
            bind: "0.0.0.0".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ephemeral store
// ---------------------------------------------------------------------------

/// Ephemeral state store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EphemeralSection {
    /// Redis connection URL.
    pub url: String,
    /// How long to wait for the store to become ready before degrading to
    /// durable-only mode, in milliseconds.
    pub ready_timeout_ms: u64,
}

impl EphemeralSection {
    /// Ready timeout as a [`Duration`].
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for EphemeralSection {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            ready_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Durable store
// ---------------------------------------------------------------------------

/// Durable session store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableSection {
    /// MongoDB connection URL.
    pub url: String,
    /// Database name.
    pub database: String,
}

impl Default for DurableSection {
    fn default() -> Self {
        Self {
            url: "mongodb://127.0.0.1:27017".to_string(),
            database: "arbor".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Presence / lock TTLs
// ---------------------------------------------------------------------------

/// Time-to-live and throttle knobs for the ephemeral collaboration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    /// Presence and focus record TTL, seconds.
    pub presence_ttl_seconds: u64,
    /// Heartbeat record TTL, seconds. Staleness cleanup evicts users whose
    /// heartbeat is older than twice this value.
    pub heartbeat_ttl_seconds: u64,
    /// Cursor record TTL, seconds.
    pub cursor_ttl_seconds: u64,
    /// Typing indicator TTL, seconds.
    pub typing_ttl_seconds: u64,
    /// Minimum interval between cursor writes per user, seconds.
    pub cursor_throttle_seconds: u64,
    /// Default node lock duration, seconds.
    pub lock_timeout_seconds: u64,
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            presence_ttl_seconds: 300,
            heartbeat_ttl_seconds: 30,
            cursor_ttl_seconds: 60,
            typing_ttl_seconds: 10,
            cursor_throttle_seconds: 1,
            lock_timeout_seconds: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Durable editing-session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Sessions idle for longer than this are deactivated by the periodic
    /// cleanup, in minutes.
    pub session_timeout_minutes: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Activity batching and retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySection {
    /// Batch flush window, milliseconds.
    pub batch_ms: u64,
    /// Batch flush size; a queue reaching this flushes immediately.
    pub batch_max: usize,
    /// Days of activity history kept by the retention job.
    pub retention_days: u32,
}

impl ActivitySection {
    /// Flush window as a [`Duration`].
    #[must_use]
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_ms)
    }
}

impl Default for ActivitySection {
    fn default() -> Self {
        Self {
            batch_ms: 2_000,
            batch_max: 10,
            retention_days: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging level and output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level filter (`trace` … `error`).
    pub level: String,
    /// Output format: `pretty`, `compact`, or `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}
