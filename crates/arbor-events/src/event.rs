//! Canvas event payloads and the wire envelope.
//!
//! Every state change to presence or lock state publishes exactly one
//! envelope on the owning canvas's channel. The envelope shape
//! `{ type, data, timestamp }` and the SCREAMING_CASE type names are shared
//! with existing clusters and must not drift.

use arbor_core::{
    CanvasId, ConversationFocus, ConversationId, CursorPosition, NodeId, NodeLock, TypingIndicator,
    UserId, UserInfo, UserPresence,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload for `USER_LEFT`.
///
/// The presence record is read before deletion so the outbound event can
/// carry the user object; when the record already lapsed only the
/// identifiers remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftPayload {
    /// The canvas left.
    pub canvas_id: CanvasId,
    /// The departing user.
    pub user_id: UserId,
    /// The user object, when the presence record was still readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

/// Payload for `NODE_UNLOCKED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUnlockedPayload {
    /// The canvas the node lives on.
    pub canvas_id: CanvasId,
    /// The conversation the node belongs to.
    pub conversation_id: ConversationId,
    /// The unlocked node.
    pub node_id: NodeId,
    /// The user who released the lock.
    pub user_id: UserId,
}

/// Payload for `TYPING_STOPPED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStoppedPayload {
    /// The canvas the node lives on.
    pub canvas_id: CanvasId,
    /// The node typing stopped in.
    pub node_id: NodeId,
    /// The user who stopped typing.
    pub user_id: UserId,
}

/// Payload for `LOCK_EXPIRED`, published by the stale-lock scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockExpiredPayload {
    /// The canvas the node lives on.
    pub canvas_id: CanvasId,
    /// The conversation the node belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// The node whose lock lapsed.
    pub node_id: NodeId,
    /// The previous owner, when the lock record was still readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// The closed set of events published on `canvas:{canvasId}:events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CanvasEvent {
    /// A user joined the canvas (or refreshed their presence).
    #[serde(rename = "USER_JOINED")]
    UserJoined(UserPresence),
    /// A user left, or was evicted by the stale-presence scan.
    #[serde(rename = "USER_LEFT")]
    UserLeft(UserLeftPayload),
    /// A user focused a conversation, replacing any prior focus.
    #[serde(rename = "CONVERSATION_FOCUSED")]
    ConversationFocused(ConversationFocus),
    /// A node lock was acquired.
    #[serde(rename = "NODE_LOCKED")]
    NodeLocked(NodeLock),
    /// A node lock was released by its owner.
    #[serde(rename = "NODE_UNLOCKED")]
    NodeUnlocked(NodeUnlockedPayload),
    /// A cursor moved.
    #[serde(rename = "CURSOR_UPDATED")]
    CursorUpdated(CursorPosition),
    /// A user started typing in a node.
    #[serde(rename = "TYPING_STARTED")]
    TypingStarted(TypingIndicator),
    /// A user stopped typing in a node.
    #[serde(rename = "TYPING_STOPPED")]
    TypingStopped(TypingStoppedPayload),
    /// A lapsed lock was reaped by the stale-lock scan.
    #[serde(rename = "LOCK_EXPIRED")]
    LockExpired(LockExpiredPayload),
}

impl CanvasEvent {
    /// The wire name of this event, also used as the socket event name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "USER_JOINED",
            Self::UserLeft(_) => "USER_LEFT",
            Self::ConversationFocused(_) => "CONVERSATION_FOCUSED",
            Self::NodeLocked(_) => "NODE_LOCKED",
            Self::NodeUnlocked(_) => "NODE_UNLOCKED",
            Self::CursorUpdated(_) => "CURSOR_UPDATED",
            Self::TypingStarted(_) => "TYPING_STARTED",
            Self::TypingStopped(_) => "TYPING_STOPPED",
            Self::LockExpired(_) => "LOCK_EXPIRED",
        }
    }

    /// The canvas this event belongs to, for channel routing.
    #[must_use]
    pub fn canvas_id(&self) -> &CanvasId {
        match self {
            Self::UserJoined(p) => &p.canvas_id,
            Self::UserLeft(p) => &p.canvas_id,
            Self::ConversationFocused(p) => &p.canvas_id,
            Self::NodeLocked(p) => &p.canvas_id,
            Self::NodeUnlocked(p) => &p.canvas_id,
            Self::CursorUpdated(p) => &p.canvas_id,
            Self::TypingStarted(p) => &p.canvas_id,
            Self::TypingStopped(p) => &p.canvas_id,
            Self::LockExpired(p) => &p.canvas_id,
        }
    }
}

/// The message published on a canvas channel: `{ type, data, timestamp }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The event, adjacently tagged into `type` + `data`.
    #[serde(flatten)]
    pub event: CanvasEvent,
    /// When the state change was published (ISO-8601 UTC).
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap an event, stamped now.
    #[must_use]
    pub fn new(event: CanvasEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    /// Serialize for publishing.
    ///
    /// # Errors
    ///
    /// Returns the underlying serializer error; payloads are plain data so
    /// this only fails on exotic float values.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a message received from a canvas channel.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error for unknown types or malformed
    /// payloads; subscribers log and skip these.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
