//! Identifier newtypes and shared user info.
//!
//! Canvas, conversation, node, and user identifiers are opaque strings minted
//! by the surrounding application; the collaboration core never parses them.
//! Session identifiers are minted here (UUID v4) when a client connects or a
//! hybrid editing session starts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// A top-level workspace containing multiple conversation trees.
    CanvasId
}

string_id! {
    /// A single branching tree living on a canvas.
    ConversationId
}

string_id! {
    /// One message in a conversation; may have children (branches).
    NodeId
}

string_id! {
    /// A user known to the durable store's membership layer.
    UserId
}

/// An editing-session identifier (UUID v4).
///
/// One session exists per connected socket and per hybrid editing session;
/// node locks record the session that acquired them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Mint a fresh session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The user object embedded in presence, focus, and lock payloads so that
/// clients can render names without a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Canonical user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
}

impl UserInfo {
    /// Build a user object.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_roundtrip() {
        let id = CanvasId::new("canvas-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"canvas-1\"");
        let back: CanvasId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_session_id_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_user_info_wire_shape() {
        let user = UserInfo::new("u1", "Ada", "ada@example.com");
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["id"], "u1");
        assert_eq!(value["name"], "Ada");
        assert_eq!(value["email"], "ada@example.com");
    }
}
