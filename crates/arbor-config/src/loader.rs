//! Config file loading and environment overrides.
//!
//! The `load()` algorithm:
//! 1. Start from compiled-in defaults
//! 2. Merge the TOML file at `path`, if present
//! 3. Apply environment variable overrides
//! 4. Validate
//!
//! Recognized environment variables: `ESS_URL`, `MONGODB_URL`, `PORT`,
//! `SESSION_TIMEOUT_MINUTES`, `LOCK_TIMEOUT_SECONDS`, `PRESENCE_TTL_SECONDS`,
//! `CURSOR_TTL_SECONDS`, `TYPING_TTL_SECONDS`, `HEARTBEAT_TTL_SECONDS`,
//! `CURSOR_THROTTLE_SECONDS`, `ACTIVITY_BATCH_MS`, `ACTIVITY_BATCH_MAX`,
//! `ACTIVITY_RETENTION_DAYS`, `ESS_READY_TIMEOUT_MS`.

use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Load configuration from an optional TOML file plus environment overrides.
///
/// A missing file is not an error; defaults apply.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed, an override fails to
/// parse, or the merged configuration fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                path: p.display().to_string(),
                source,
            })?;
            let config = toml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: p.display().to_string(),
                message: e.to_string(),
            })?;
            info!(path = %p.display(), "loaded config file");
            config
        },
        _ => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

/// Load configuration from environment overrides only.
///
/// # Errors
///
/// Returns a [`ConfigError`] if an override fails to parse or validation
/// fails.
pub fn load_from_env() -> ConfigResult<Config> {
    load(None)
}

fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Ok(url) = std::env::var("ESS_URL") {
        config.ephemeral.url = url;
    }
    if let Ok(url) = std::env::var("MONGODB_URL") {
        config.durable.url = url;
    }
    override_parsed("PORT", &mut config.server.port)?;
    override_parsed(
        "SESSION_TIMEOUT_MINUTES",
        &mut config.sessions.session_timeout_minutes,
    )?;
    override_parsed(
        "LOCK_TIMEOUT_SECONDS",
        &mut config.presence.lock_timeout_seconds,
    )?;
    override_parsed(
        "PRESENCE_TTL_SECONDS",
        &mut config.presence.presence_ttl_seconds,
    )?;
    override_parsed("CURSOR_TTL_SECONDS", &mut config.presence.cursor_ttl_seconds)?;
    override_parsed("TYPING_TTL_SECONDS", &mut config.presence.typing_ttl_seconds)?;
    override_parsed(
        "HEARTBEAT_TTL_SECONDS",
        &mut config.presence.heartbeat_ttl_seconds,
    )?;
    override_parsed(
        "CURSOR_THROTTLE_SECONDS",
        &mut config.presence.cursor_throttle_seconds,
    )?;
    override_parsed("ACTIVITY_BATCH_MS", &mut config.activity.batch_ms)?;
    override_parsed("ACTIVITY_BATCH_MAX", &mut config.activity.batch_max)?;
    override_parsed(
        "ACTIVITY_RETENTION_DAYS",
        &mut config.activity.retention_days,
    )?;
    override_parsed(
        "ESS_READY_TIMEOUT_MS",
        &mut config.ephemeral.ready_timeout_ms,
    )?;
    Ok(())
}

fn override_parsed<T: FromStr>(name: &str, slot: &mut T) -> ConfigResult<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        *slot = raw.parse().map_err(|e: T::Err| ConfigError::Parse {
            path: name.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

fn validate(config: &Config) -> ConfigResult<()> {
    if config.activity.batch_max == 0 {
        return Err(ConfigError::Validation(
            "activity.batch_max must be at least 1".to_string(),
        ));
    }
    for (name, value) in [
        ("presence.presence_ttl_seconds", config.presence.presence_ttl_seconds),
        ("presence.heartbeat_ttl_seconds", config.presence.heartbeat_ttl_seconds),
        ("presence.cursor_ttl_seconds", config.presence.cursor_ttl_seconds),
        ("presence.typing_ttl_seconds", config.presence.typing_ttl_seconds),
        ("presence.lock_timeout_seconds", config.presence.lock_timeout_seconds),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{name} must be at least 1")));
        }
    }
    if config.ephemeral.url.is_empty() {
        return Err(ConfigError::Validation(
            "ephemeral.url must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load(Some(Path::new("/nonexistent/arbor.toml"))).unwrap();
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 4000\n\n[presence]\nlock_timeout_seconds = 15\n"
        )
        .unwrap();
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.presence.lock_timeout_seconds, 15);
        // Untouched sections keep defaults.
        assert_eq!(config.presence.presence_ttl_seconds, 300);
    }

    #[test]
    fn test_zero_batch_max_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[activity]\nbatch_max = 0\n").unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
