//! Arbor Core - Foundation types for the Arbor collaboration substrate.
//!
//! This crate provides:
//! - Identifier newtypes for canvases, conversations, nodes, users, sessions
//! - The ephemeral collaboration entities (presence, locks, cursors, typing)
//! - The closed error set shared by every collaboration operation
//! - Retry utilities with exponential backoff

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod error;
pub mod model;
pub mod retry;
pub mod types;

pub use error::{CollabError, CollabResult};
pub use model::{
    CanvasPresence, ConversationFocus, CursorPosition, NodeLock, TypingIndicator, UserPresence,
};
pub use retry::{RetryConfig, retry};
pub use types::{CanvasId, ConversationId, NodeId, SessionId, UserId, UserInfo};
