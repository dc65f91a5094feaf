//! Relay core library: change aggregation, command messages, configuration.
//!
//! Public API surface:
//! - [`changes`]: [`ChangeAggregator`] and the deep-merge rules
//! - [`command`]: [`CommandMessage`] as received on the command socket
//! - [`config`]: layered configuration resolved into [`DaemonConfig`]
//! - [`error`]: [`ConfigError`]

pub mod changes;
pub mod command;
pub mod config;
pub mod error;

pub use changes::{ChangeAggregator, ChangeTree, PATH_DELIMITER};
pub use command::CommandMessage;
pub use config::{clamp_cycle, ConfigFile, DaemonConfig};
pub use error::ConfigError;
