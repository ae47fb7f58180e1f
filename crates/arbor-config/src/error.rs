//! Configuration error types.

use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The offending path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A config file or environment override failed to parse.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// The offending file or variable.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The merged configuration is semantically invalid.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
