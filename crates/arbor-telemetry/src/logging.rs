//! Logging configuration and subscriber installation.

use tracing_subscriber::EnvFilter;

use crate::error::{TelemetryError, TelemetryResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human-readable output for local development.
    Pretty,
    /// Single-line output for terminals and service logs.
    #[default]
    Compact,
    /// Structured JSON for log shippers.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::InvalidFilter(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level filter (`trace` … `error`).
    level: String,
    /// Output format.
    format: LogFormat,
    /// Additional per-target directives (`target=level`).
    directives: Vec<String>,
}

impl LogConfig {
    /// Create a config with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::default(),
            directives: Vec::new(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Add a per-target directive, e.g. `"arbor_gateway=trace"`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build the `EnvFilter`. `RUST_LOG`, when set, wins over the configured
    /// base level; explicit directives are always appended.
    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let base = std::env::var("RUST_LOG").unwrap_or_else(|_| self.level.clone());
        let spec = std::iter::once(base)
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::try_new(&spec).map_err(|e| TelemetryError::InvalidFilter(e.to_string()))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup, before any spans are created.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if the level or a directive does
/// not parse, or [`TelemetryError::AlreadyInitialized`] if a subscriber is
/// already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("verbose".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_filter_includes_directives() {
        let config = LogConfig::new("info").with_directive("arbor_collab=debug");
        // Filter construction should succeed with combined spec.
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LogConfig::new("not-a-level=");
        assert!(config.filter().is_err());
    }
}
