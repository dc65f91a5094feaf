//! Layered daemon configuration.
//!
//! # Precedence
//!
//! ```text
//! built-in defaults  <  YAML config file  <  command-line flags
//! ```
//!
//! Every layer is a [`ConfigFile`] with all-optional fields. Layers are
//! combined with [`ConfigFile::merge`] and validated once by
//! [`ConfigFile::resolve`] into a [`DaemonConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SOCKET_HOST: &str = "127.0.0.1";
pub const DEFAULT_SOCKET_PORT: u16 = 55009;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Flush interval substituted when the requested one is out of range.
pub const DEFAULT_CYCLE_SECS: f64 = 0.5;
/// Exclusive upper bound for the flush interval.
pub const MAX_CYCLE_SECS: f64 = 10.0;

pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a command connection may stay open without half-closing.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Clamp a flush interval in seconds: values outside `(0, 10)` (and NaN)
/// fall back to 0.5 s.
pub fn clamp_cycle(secs: f64) -> Duration {
    if secs > 0.0 && secs < MAX_CYCLE_SECS {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs_f64(DEFAULT_CYCLE_SECS)
    }
}

/// `<tmp>/relayd/daemon.pid`
pub fn default_pid_file() -> PathBuf {
    std::env::temp_dir().join("relayd").join("daemon.pid")
}

/// Fully resolved configuration consumed by the daemon runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub socket_host: String,
    pub socket_port: u16,
    pub callback_url: String,
    pub api_key: String,
    /// Requested flush interval in seconds, unclamped.
    pub cycle: f64,
    pub pid_file: PathBuf,
    pub log_level: String,
    pub startup_grace: Duration,
    pub shutdown_timeout: Duration,
    pub request_timeout: Duration,
    pub read_timeout: Duration,
}

impl DaemonConfig {
    /// Minimal config with defaults for everything but the two required settings.
    pub fn new(callback_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            socket_host: DEFAULT_SOCKET_HOST.to_string(),
            socket_port: DEFAULT_SOCKET_PORT,
            callback_url: callback_url.into(),
            api_key: api_key.into(),
            cycle: DEFAULT_CYCLE_SECS,
            pid_file: default_pid_file(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            startup_grace: DEFAULT_STARTUP_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// The flush interval the publisher will actually use.
    pub fn flush_interval(&self) -> Duration {
        clamp_cycle(self.cycle)
    }
}

/// One configuration layer. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_grace_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Read a YAML layer from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merge(self, other: ConfigFile) -> ConfigFile {
        ConfigFile {
            socket_host: other.socket_host.or(self.socket_host),
            socket_port: other.socket_port.or(self.socket_port),
            callback_url: other.callback_url.or(self.callback_url),
            api_key: other.api_key.or(self.api_key),
            cycle: other.cycle.or(self.cycle),
            pid_file: other.pid_file.or(self.pid_file),
            log_level: other.log_level.or(self.log_level),
            startup_grace_ms: other.startup_grace_ms.or(self.startup_grace_ms),
            shutdown_timeout_ms: other.shutdown_timeout_ms.or(self.shutdown_timeout_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            read_timeout_ms: other.read_timeout_ms.or(self.read_timeout_ms),
        }
    }

    /// Fill defaults and validate.
    pub fn resolve(self) -> Result<DaemonConfig, ConfigError> {
        let callback_url = self
            .callback_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("callback_url"))?;
        validate_callback_url(&callback_url)?;

        let api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing("api_key"))?;

        let mut config = DaemonConfig::new(callback_url, api_key);
        if let Some(host) = self.socket_host {
            config.socket_host = host;
        }
        if let Some(port) = self.socket_port {
            config.socket_port = port;
        }
        if let Some(cycle) = self.cycle {
            config.cycle = cycle;
        }
        if let Some(pid_file) = self.pid_file {
            config.pid_file = pid_file;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(ms) = self.startup_grace_ms {
            config.startup_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn validate_callback_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCallbackUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
