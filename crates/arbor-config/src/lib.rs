//! Arbor Config - Unified configuration for the collaboration substrate.
//!
//! Configuration is layered: compiled-in defaults, then an optional TOML
//! file, then environment variable overrides. Every section defaults to
//! production-ready values so a missing file still yields a working server.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load, load_from_env};
pub use types::{
    ActivitySection, Config, DurableSection, EphemeralSection, LoggingSection, PresenceSection,
    ServerSection, SessionsSection,
};
