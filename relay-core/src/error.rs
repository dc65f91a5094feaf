//! Error types for relay-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the config file.
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; carries the file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required setting was not provided by any layer.
    #[error("missing required setting '{0}'")]
    Missing(&'static str),

    /// The callback URL is not an absolute http(s) URL.
    #[error("invalid callback url '{url}': {reason}")]
    InvalidCallbackUrl { url: String, reason: String },
}
