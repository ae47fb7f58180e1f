//! Convenience re-exports for downstream crates.

pub use crate::error::{CollabError, CollabResult};
pub use crate::model::{
    CanvasPresence, ConversationFocus, CursorPosition, NodeLock, TypingIndicator, UserPresence,
};
pub use crate::types::{CanvasId, ConversationId, NodeId, SessionId, UserId, UserInfo};
