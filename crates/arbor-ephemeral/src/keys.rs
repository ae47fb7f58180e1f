//! The ephemeral key scheme.
//!
//! These strings are shared with existing clusters; they must stay bit-exact.
//!
//! ```text
//! canvas:{canvasId}:presence:{userId}                              hash, TTL 300s
//! canvas:{canvasId}:presence                                       set
//! canvas:{canvasId}:conversation:{conversationId}:focus:{userId}   hash, TTL 300s
//! canvas:{canvasId}:conversation:{conversationId}:focus            set
//! canvas:{canvasId}:conversation:{conversationId}:node:{nodeId}:lock   string(JSON)
//! canvas:{canvasId}:cursor:{userId}                                hash, TTL 60s
//! canvas:{canvasId}:cursors                                        set
//! canvas:{canvasId}:node:{nodeId}:typing:{userId}                  string(JSON), TTL 10s
//! canvas:{canvasId}:node:{nodeId}:typing                           set
//! canvas:{canvasId}:activity:{userId}                              string(ms epoch), TTL 30s
//! throttle:cursor:{userId}                                         string, TTL 1s
//! ```

use arbor_core::{CanvasId, ConversationId, NodeId, UserId};

/// The pattern the gateway subscribes to at startup.
pub const EVENTS_PATTERN: &str = "canvas:*:events";

/// Per-canvas pub/sub channel.
#[must_use]
pub fn events_channel(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:events")
}

/// Presence hash for one user.
#[must_use]
pub fn presence(canvas_id: &CanvasId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:presence:{user_id}")
}

/// Membership set of present users.
#[must_use]
pub fn presence_set(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:presence")
}

/// All presence hashes on a canvas.
#[must_use]
pub fn presence_pattern(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:presence:*")
}

/// Focus hash for one user on one conversation.
#[must_use]
pub fn focus(canvas_id: &CanvasId, conversation_id: &ConversationId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:conversation:{conversation_id}:focus:{user_id}")
}

/// Membership set of users focusing a conversation.
#[must_use]
pub fn focus_set(canvas_id: &CanvasId, conversation_id: &ConversationId) -> String {
    format!("canvas:{canvas_id}:conversation:{conversation_id}:focus")
}

/// Every focus key held by one user anywhere on a canvas.
#[must_use]
pub fn user_focus_pattern(canvas_id: &CanvasId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:conversation:*:focus:{user_id}")
}

/// Every focus set on a canvas.
#[must_use]
pub fn focus_set_pattern(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:conversation:*:focus")
}

/// The single-writer lock record for a node.
#[must_use]
pub fn node_lock(canvas_id: &CanvasId, conversation_id: &ConversationId, node_id: &NodeId) -> String {
    format!("canvas:{canvas_id}:conversation:{conversation_id}:node:{node_id}:lock")
}

/// Every lock record on a canvas.
#[must_use]
pub fn lock_pattern(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:conversation:*:node:*:lock")
}

/// Cursor hash for one user.
#[must_use]
pub fn cursor(canvas_id: &CanvasId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:cursor:{user_id}")
}

/// Membership set of users with live cursors.
#[must_use]
pub fn cursor_set(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:cursors")
}

/// Typing record for one user in one node.
#[must_use]
pub fn typing(canvas_id: &CanvasId, node_id: &NodeId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:node:{node_id}:typing:{user_id}")
}

/// Membership set of users typing in a node.
#[must_use]
pub fn typing_set(canvas_id: &CanvasId, node_id: &NodeId) -> String {
    format!("canvas:{canvas_id}:node:{node_id}:typing")
}

/// Every typing record held by one user anywhere on a canvas.
#[must_use]
pub fn user_typing_pattern(canvas_id: &CanvasId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:node:*:typing:{user_id}")
}

/// Every typing set on a canvas.
#[must_use]
pub fn typing_set_pattern(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:node:*:typing")
}

/// Heartbeat record (milliseconds since epoch, as a decimal string).
#[must_use]
pub fn heartbeat(canvas_id: &CanvasId, user_id: &UserId) -> String {
    format!("canvas:{canvas_id}:activity:{user_id}")
}

/// Every heartbeat record on a canvas.
#[must_use]
pub fn heartbeat_pattern(canvas_id: &CanvasId) -> String {
    format!("canvas:{canvas_id}:activity:*")
}

/// Per-user cursor write throttle marker.
#[must_use]
pub fn cursor_throttle(user_id: &UserId) -> String {
    format!("throttle:cursor:{user_id}")
}

/// Extract `(conversationId, userId)` from a focus key.
///
/// Returns `None` for keys of any other shape (including focus sets).
#[must_use]
pub fn parse_focus_key(key: &str) -> Option<(ConversationId, UserId)> {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["canvas", _, "conversation", conversation, "focus", user] => Some((
            ConversationId::new(*conversation),
            UserId::new(*user),
        )),
        _ => None,
    }
}

/// Extract `(conversationId, nodeId)` from a lock key.
#[must_use]
pub fn parse_lock_key(key: &str) -> Option<(ConversationId, NodeId)> {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["canvas", _, "conversation", conversation, "node", node, "lock"] => {
            Some((ConversationId::new(*conversation), NodeId::new(*node)))
        },
        _ => None,
    }
}

/// Extract `(nodeId, userId)` from a typing record key.
#[must_use]
pub fn parse_typing_key(key: &str) -> Option<(NodeId, UserId)> {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["canvas", _, "node", node, "typing", user] => {
            Some((NodeId::new(*node), UserId::new(*user)))
        },
        _ => None,
    }
}

/// Extract the user from a heartbeat key.
#[must_use]
pub fn parse_heartbeat_key(key: &str) -> Option<UserId> {
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["canvas", _, "activity", user] => Some(UserId::new(*user)),
        _ => None,
    }
}

/// Extract the canvas from an events channel name.
#[must_use]
pub fn parse_events_channel(channel: &str) -> Option<CanvasId> {
    let parts: Vec<&str> = channel.split(':').collect();
    match parts.as_slice() {
        ["canvas", canvas, "events"] => Some(CanvasId::new(*canvas)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme_is_bit_exact() {
        let canvas = CanvasId::new("c1");
        let conversation = ConversationId::new("v1");
        let node = NodeId::new("n1");
        let user = UserId::new("u1");

        assert_eq!(presence(&canvas, &user), "canvas:c1:presence:u1");
        assert_eq!(presence_set(&canvas), "canvas:c1:presence");
        assert_eq!(
            focus(&canvas, &conversation, &user),
            "canvas:c1:conversation:v1:focus:u1"
        );
        assert_eq!(focus_set(&canvas, &conversation), "canvas:c1:conversation:v1:focus");
        assert_eq!(
            node_lock(&canvas, &conversation, &node),
            "canvas:c1:conversation:v1:node:n1:lock"
        );
        assert_eq!(cursor(&canvas, &user), "canvas:c1:cursor:u1");
        assert_eq!(cursor_set(&canvas), "canvas:c1:cursors");
        assert_eq!(typing(&canvas, &node, &user), "canvas:c1:node:n1:typing:u1");
        assert_eq!(typing_set(&canvas, &node), "canvas:c1:node:n1:typing");
        assert_eq!(heartbeat(&canvas, &user), "canvas:c1:activity:u1");
        assert_eq!(cursor_throttle(&user), "throttle:cursor:u1");
        assert_eq!(events_channel(&canvas), "canvas:c1:events");
    }

    #[test]
    fn test_parse_focus_key() {
        let (conversation, user) = parse_focus_key("canvas:c1:conversation:v9:focus:u3").unwrap();
        assert_eq!(conversation.as_str(), "v9");
        assert_eq!(user.as_str(), "u3");
        // The focus set must not parse as a record.
        assert!(parse_focus_key("canvas:c1:conversation:v9:focus").is_none());
    }

    #[test]
    fn test_parse_lock_key() {
        let (conversation, node) =
            parse_lock_key("canvas:c1:conversation:v1:node:n7:lock").unwrap();
        assert_eq!(conversation.as_str(), "v1");
        assert_eq!(node.as_str(), "n7");
        assert!(parse_lock_key("canvas:c1:presence:u1").is_none());
    }

    #[test]
    fn test_parse_typing_and_heartbeat_keys() {
        let (node, user) = parse_typing_key("canvas:c1:node:n2:typing:u4").unwrap();
        assert_eq!(node.as_str(), "n2");
        assert_eq!(user.as_str(), "u4");
        assert!(parse_typing_key("canvas:c1:node:n2:typing").is_none());

        assert_eq!(
            parse_heartbeat_key("canvas:c1:activity:u5").unwrap().as_str(),
            "u5"
        );
    }

    #[test]
    fn test_parse_events_channel() {
        assert_eq!(
            parse_events_channel("canvas:c42:events").unwrap().as_str(),
            "c42"
        );
        assert!(parse_events_channel("canvas:c42:presence").is_none());
    }
}
