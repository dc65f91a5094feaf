//! `relayd send`: deliver one command to a running daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use relay_core::config::{DEFAULT_SOCKET_HOST, DEFAULT_SOCKET_PORT};
use relay_core::{CommandMessage, ConfigFile};
use relay_daemon::{send_command, DaemonError};

use crate::demo::DemoAction;

pub const DEFAULT_MESSAGE: &str = "Async IO is amazing";

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Action name, e.g. think or ping.
    pub action: String,

    /// Read socket address and apikey from this YAML file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub sockethost: Option<String>,

    #[arg(long)]
    pub socketport: Option<u16>,

    #[arg(long)]
    pub apikey: Option<String>,

    /// Text for actions that carry a message.
    #[arg(long, default_value = DEFAULT_MESSAGE)]
    pub message: String,
}

impl SendArgs {
    fn command(&self, apikey: String) -> CommandMessage {
        let message = CommandMessage::new(apikey, self.action.clone());
        match DemoAction::from_name(&self.action) {
            Some(DemoAction::Ping) => message,
            _ => message.with_field("message", self.message.clone()),
        }
    }

    pub fn run(self) -> Result<()> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let host = self
            .sockethost
            .clone()
            .or(file.socket_host)
            .unwrap_or_else(|| DEFAULT_SOCKET_HOST.to_string());
        let port = self.socketport.or(file.socket_port).unwrap_or(DEFAULT_SOCKET_PORT);
        let Some(apikey) = self.apikey.clone().or(file.api_key) else {
            bail!("an apikey is required (--apikey or api_key in --config)");
        };

        match send_command(&host, port, &self.command(apikey)) {
            Ok(()) => {
                println!("sent '{}' to {host}:{port}", self.action);
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { addr }) => {
                bail!("daemon is not running on {addr}")
            }
            Err(err) => Err(err).context("failed to send command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(action: &str) -> SendArgs {
        SendArgs {
            action: action.into(),
            config: None,
            sockethost: None,
            socketport: None,
            apikey: None,
            message: DEFAULT_MESSAGE.into(),
        }
    }

    #[test]
    fn think_carries_the_message() {
        let command = args("think").command("k".into());
        assert_eq!(command.field("message"), Some(&json!("Async IO is amazing")));
    }

    #[test]
    fn ping_has_no_message() {
        let command = args("ping").command("k".into());
        assert_eq!(command.field("message"), None);
        assert_eq!(command.action, "ping");
    }
}
