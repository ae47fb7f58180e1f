//! Ephemeral store error types.

use thiserror::Error;

/// Errors from ephemeral store operations.
#[derive(Debug, Error)]
pub enum EphemeralError {
    /// The store is unreachable or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store did not become ready within the configured timeout.
    #[error("store not ready within {0}ms")]
    ReadyTimeout(u128),

    /// A command was rejected or returned an unexpected shape.
    #[error("command error: {0}")]
    Command(String),

    /// A stored payload failed to parse.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for EphemeralError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

/// Result type for ephemeral store operations.
pub type EphemeralResult<T> = Result<T, EphemeralError>;
