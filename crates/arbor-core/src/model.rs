//! Ephemeral collaboration entities.
//!
//! Every struct here serializes camelCase; these shapes are the wire format
//! shared with existing clusters, so field names must not drift.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CanvasId, ConversationId, NodeId, SessionId, UserId, UserInfo};

/// A user's live presence on a canvas.
///
/// Written on join, refreshed by heartbeats, expired by TTL or explicit leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    /// Canvas the user is present on.
    pub canvas_id: CanvasId,
    /// Canonical user identifier.
    pub user_id: UserId,
    /// Embedded user object for display.
    pub user: UserInfo,
    /// When the user joined this canvas.
    pub joined_at: DateTime<Utc>,
    /// Last heartbeat or collaboration action.
    pub last_activity_at: DateTime<Utc>,
    /// Whether the user is considered active.
    pub is_active: bool,
}

/// A user's currently-viewed conversation within a canvas.
///
/// At most one focus exists per (canvas, user); acquiring a new focus clears
/// any prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFocus {
    /// Canvas the conversation lives on.
    pub canvas_id: CanvasId,
    /// The focused conversation.
    pub conversation_id: ConversationId,
    /// The focusing user.
    pub user_id: UserId,
    /// Embedded user object for display.
    pub user: UserInfo,
    /// When focus was acquired.
    pub focused_at: DateTime<Utc>,
}

/// The single-writer exclusive lock on a node for a bounded period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLock {
    /// Canvas the node lives on.
    pub canvas_id: CanvasId,
    /// Conversation the node belongs to.
    pub conversation_id: ConversationId,
    /// The locked node.
    pub node_id: NodeId,
    /// The lock owner.
    pub user_id: UserId,
    /// Embedded user object so callers can display who holds the lock.
    pub user: UserInfo,
    /// When the lock was acquired (or last extended).
    pub locked_at: DateTime<Utc>,
    /// When the lock lapses. A lock past this instant is semantically absent
    /// regardless of storage state.
    pub expires_at: DateTime<Utc>,
    /// The editing session that acquired the lock.
    pub session_id: SessionId,
}

impl NodeLock {
    /// Whether the lock has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A user's cursor position on the canvas, throttled to one write per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    /// Canvas the cursor is on.
    pub canvas_id: CanvasId,
    /// The cursor's owner.
    pub user_id: UserId,
    /// Embedded user object for display.
    pub user: UserInfo,
    /// Canvas-space X coordinate.
    pub x: f64,
    /// Canvas-space Y coordinate.
    pub y: f64,
    /// When the position was last written.
    pub updated_at: DateTime<Utc>,
}

/// A short-lived "user is typing in this node" marker.
///
/// Requires renewal within its TTL; silence means not typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    /// Canvas the node lives on.
    pub canvas_id: CanvasId,
    /// The node being typed into.
    pub node_id: NodeId,
    /// The typing user.
    pub user_id: UserId,
    /// Embedded user object for display.
    pub user: UserInfo,
    /// When typing started (or was last renewed).
    pub started_at: DateTime<Utc>,
}

/// Aggregated snapshot of everything live on a canvas.
///
/// Returned to clients on join and on demand so they can reconcile after a
/// disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasPresence {
    /// The canvas this snapshot describes.
    pub canvas_id: CanvasId,
    /// Users currently present.
    pub users: Vec<UserPresence>,
    /// Focus records grouped by conversation.
    pub conversation_focus: HashMap<ConversationId, Vec<ConversationFocus>>,
    /// Live node locks keyed by node.
    pub node_locks: HashMap<NodeId, NodeLock>,
    /// Cursor positions keyed by user.
    pub cursors: HashMap<UserId, CursorPosition>,
    /// Typing indicators grouped by node.
    pub typing_indicators: HashMap<NodeId, Vec<TypingIndicator>>,
    /// When this snapshot was assembled.
    pub last_updated: DateTime<Utc>,
}

impl CanvasPresence {
    /// An empty snapshot for `canvas_id`, stamped now.
    #[must_use]
    pub fn empty(canvas_id: CanvasId) -> Self {
        Self {
            canvas_id,
            users: Vec::new(),
            conversation_focus: HashMap::new(),
            node_locks: HashMap::new(),
            cursors: HashMap::new(),
            typing_indicators: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> UserInfo {
        UserInfo::new("u1", "Ada", "ada@example.com")
    }

    #[test]
    fn test_lock_expiry_boundary() {
        let now = Utc::now();
        let lock = NodeLock {
            canvas_id: CanvasId::new("c"),
            conversation_id: ConversationId::new("v"),
            node_id: NodeId::new("n"),
            user_id: UserId::new("u1"),
            user: user(),
            locked_at: now,
            expires_at: now + Duration::seconds(30),
            session_id: SessionId::new(),
        };
        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + Duration::seconds(30)));
        assert!(lock.is_expired(now + Duration::seconds(31)));
    }

    #[test]
    fn test_presence_wire_field_names() {
        let now = Utc::now();
        let presence = UserPresence {
            canvas_id: CanvasId::new("c1"),
            user_id: UserId::new("u1"),
            user: user(),
            joined_at: now,
            last_activity_at: now,
            is_active: true,
        };
        let value = serde_json::to_value(&presence).unwrap();
        assert!(value.get("canvasId").is_some());
        assert!(value.get("lastActivityAt").is_some());
        assert!(value.get("isActive").is_some());
    }
}
