//! The bidirectional socket protocol.
//!
//! Both directions carry JSON text frames. Inbound intents are
//! `{ "event": <name>, "data": {...} }`; outbound frames mirror that shape
//! with a server timestamp. Collaboration events from the ephemeral store
//! are forwarded under their own names (`USER_JOINED`, `NODE_LOCKED`, …).

use arbor_core::{CanvasId, ConversationId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → server intents.
///
/// Identity never travels in these payloads; it is attached to the socket at
/// the handshake. Intents other than `join_canvas` act on the canvas the
/// connection has joined.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter a canvas room.
    #[serde(rename_all = "camelCase")]
    JoinCanvas {
        /// The canvas to join.
        canvas_id: CanvasId,
    },
    /// Leave the joined canvas.
    LeaveCanvas,
    /// Focus a conversation, replacing any prior focus.
    #[serde(rename_all = "camelCase")]
    FocusConversation {
        /// The conversation to focus.
        conversation_id: ConversationId,
    },
    /// Acquire or extend the single-writer lock on a node.
    #[serde(rename_all = "camelCase")]
    LockNode {
        /// The conversation the node belongs to.
        conversation_id: ConversationId,
        /// The node to lock.
        node_id: NodeId,
        /// Lock duration in seconds; the server default applies when absent.
        #[serde(default)]
        lock_duration: Option<u64>,
    },
    /// Release a held lock.
    #[serde(rename_all = "camelCase")]
    UnlockNode {
        /// The conversation the node belongs to.
        conversation_id: ConversationId,
        /// The node to unlock.
        node_id: NodeId,
    },
    /// Report a cursor position.
    #[serde(rename_all = "camelCase")]
    UpdateCursor {
        /// Canvas-space X coordinate.
        x: f64,
        /// Canvas-space Y coordinate.
        y: f64,
    },
    /// Start a typing indicator on a node.
    #[serde(rename_all = "camelCase")]
    StartTyping {
        /// The node being typed into.
        node_id: NodeId,
    },
    /// Stop a typing indicator on a node.
    #[serde(rename_all = "camelCase")]
    StopTyping {
        /// The node typing stopped in.
        node_id: NodeId,
    },
    /// Refresh liveness; keeps presence from lapsing.
    Heartbeat,
    /// Fetch the full canvas snapshot for reconciliation.
    GetCanvasPresence,
}

impl ClientMessage {
    /// The intent name, used to derive `<event>_success` / `<event>_error`
    /// response frames.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinCanvas { .. } => "join_canvas",
            Self::LeaveCanvas => "leave_canvas",
            Self::FocusConversation { .. } => "focus_conversation",
            Self::LockNode { .. } => "lock_node",
            Self::UnlockNode { .. } => "unlock_node",
            Self::UpdateCursor { .. } => "update_cursor",
            Self::StartTyping { .. } => "start_typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::Heartbeat => "heartbeat",
            Self::GetCanvasPresence => "get_canvas_presence",
        }
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Frame name: `connected`, an `<intent>_success`/`<intent>_error`,
    /// a forwarded collaboration event, or an activity/domain broadcast.
    pub event: String,
    /// Frame payload.
    pub data: serde_json::Value,
    /// Server send time.
    pub timestamp: DateTime<Utc>,
}

impl ServerFrame {
    /// Build a frame stamped now.
    #[must_use]
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// The `<intent>_success` frame for a handled intent.
    #[must_use]
    pub fn success(intent: &str, data: serde_json::Value) -> Self {
        Self::new(format!("{intent}_success"), data)
    }

    /// The `<intent>_error` frame carrying a structured collaboration error.
    #[must_use]
    pub fn error(intent: &str, err: &arbor_core::CollabError) -> Self {
        let mut body = serde_json::json!({
            "code": err.code(),
            "message": err.to_string(),
        });
        if let Some(details) = err.details()
            && let Some(map) = body.as_object_mut()
        {
            map.insert("details".to_string(), details);
        }
        Self::new(format!("{intent}_error"), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::CollabError;

    #[test]
    fn test_inbound_parse() {
        let raw = r#"{"event":"join_canvas","data":{"canvasId":"c1"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinCanvas {
                canvas_id: CanvasId::new("c1")
            }
        );
        assert_eq!(msg.event_name(), "join_canvas");
    }

    #[test]
    fn test_inbound_unit_intents() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"get_canvas_presence"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GetCanvasPresence);
    }

    #[test]
    fn test_inbound_lock_with_duration() {
        let raw = r#"{"event":"lock_node","data":{"conversationId":"v1","nodeId":"n1","lockDuration":15}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::LockNode {
                conversation_id: ConversationId::new("v1"),
                node_id: NodeId::new("n1"),
                lock_duration: Some(15),
            }
        );
    }

    #[test]
    fn test_unknown_intent_rejected() {
        let raw = r#"{"event":"reboot_server","data":{}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_error_frame_carries_details() {
        let err = CollabError::ThrottleLimitExceeded;
        let frame = ServerFrame::error("update_cursor", &err);
        assert_eq!(frame.event, "update_cursor_error");
        assert_eq!(frame.data["code"], "THROTTLE_LIMIT_EXCEEDED");
    }
}
