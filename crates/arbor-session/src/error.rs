//! Durable store error types.

use thiserror::Error;

/// Errors from durable store operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connection to the backend failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A query or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An optimistic update lost its version race.
    #[error("version conflict on session {0}")]
    VersionConflict(String),

    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),
}

impl From<mongodb::error::Error> for SessionError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for durable store operations.
pub type SessionResult<T> = Result<T, SessionError>;
