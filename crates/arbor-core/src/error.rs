//! The closed error set shared by every collaboration operation.
//!
//! Gateways translate these into `<event>_error` socket frames and REST
//! bodies; the string codes are wire-visible and must not drift.

use thiserror::Error;

use crate::model::NodeLock;
use crate::types::{NodeId, UserId};

/// Errors surfaced by collaboration operations.
#[derive(Debug, Error)]
pub enum CollabError {
    /// Another user already holds the node lock. Carries the current lock so
    /// callers can display who holds it.
    #[error("node {} is locked by {}", .current_lock.node_id, .current_lock.user_id)]
    LockAlreadyHeld {
        /// The lock currently in force.
        current_lock: Box<NodeLock>,
    },

    /// No live lock exists on the node.
    #[error("no lock found for node {node_id}")]
    LockNotFound {
        /// The node that was probed.
        node_id: NodeId,
    },

    /// The caller does not own the lock it tried to release.
    #[error("lock on node {node_id} is owned by {owner}")]
    LockNotOwned {
        /// The node whose lock was targeted.
        node_id: NodeId,
        /// The actual owner.
        owner: UserId,
    },

    /// The user has no presence record on the canvas.
    #[error("user {user_id} is not present on this canvas")]
    UserNotPresent {
        /// The absent user.
        user_id: UserId,
    },

    /// A cursor update arrived inside the per-user throttle window.
    ///
    /// Expected under load; handlers log this at debug, never error.
    #[error("cursor update throttled")]
    ThrottleLimitExceeded,

    /// The ephemeral store is unreachable. Read paths may degrade to the
    /// durable store; strictly-ephemeral operations fail with this.
    #[error("ephemeral store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed or missing input from the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A durable-store or serialization failure that is not part of the
    /// client-visible protocol.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollabError {
    /// The wire code reported to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockAlreadyHeld { .. } => "LOCK_ALREADY_HELD",
            Self::LockNotFound { .. } => "LOCK_NOT_FOUND",
            Self::LockNotOwned { .. } => "LOCK_NOT_OWNED",
            Self::UserNotPresent { .. } => "USER_NOT_PRESENT",
            Self::ThrottleLimitExceeded => "THROTTLE_LIMIT_EXCEEDED",
            Self::StoreUnavailable(_) => "ESS_CONNECTION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured detail payload for the error, when one exists.
    ///
    /// `LOCK_ALREADY_HELD` carries the current lock so UIs can show the
    /// holder without a second round trip.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::LockAlreadyHeld { current_lock } => serde_json::to_value(current_lock)
                .ok()
                .map(|lock| serde_json::json!({ "currentLock": lock })),
            _ => None,
        }
    }

    /// Whether the error is an expected rejection rather than a fault.
    ///
    /// Expected rejections (throttles, lock contention) are part of normal
    /// operation and must not be logged at error level.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::ThrottleLimitExceeded | Self::LockAlreadyHeld { .. } | Self::LockNotOwned { .. }
        )
    }
}

/// Result type for collaboration operations.
pub type CollabResult<T> = Result<T, CollabError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanvasId, ConversationId, SessionId, UserInfo};
    use chrono::{Duration, Utc};

    fn sample_lock() -> NodeLock {
        let now = Utc::now();
        NodeLock {
            canvas_id: CanvasId::new("c"),
            conversation_id: ConversationId::new("v"),
            node_id: NodeId::new("n"),
            user_id: UserId::new("holder"),
            user: UserInfo::new("holder", "Holder", "h@example.com"),
            locked_at: now,
            expires_at: now + Duration::seconds(30),
            session_id: SessionId::new(),
        }
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            CollabError::LockAlreadyHeld {
                current_lock: Box::new(sample_lock())
            }
            .code(),
            "LOCK_ALREADY_HELD"
        );
        assert_eq!(CollabError::ThrottleLimitExceeded.code(), "THROTTLE_LIMIT_EXCEEDED");
        assert_eq!(
            CollabError::StoreUnavailable("down".into()).code(),
            "ESS_CONNECTION_ERROR"
        );
    }

    #[test]
    fn test_lock_already_held_carries_current_lock() {
        let err = CollabError::LockAlreadyHeld {
            current_lock: Box::new(sample_lock()),
        };
        let details = err.details().unwrap();
        assert_eq!(details["currentLock"]["userId"], "holder");
    }

    #[test]
    fn test_throttle_is_expected() {
        assert!(CollabError::ThrottleLimitExceeded.is_expected());
        assert!(!CollabError::InvalidInput("x".into()).is_expected());
    }
}
