//! `relayd run`: resolve configuration, write the PID file, run the daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use relay_core::{ConfigFile, DaemonConfig};
use relay_daemon::{init_tracing, start_blocking, PidFile, RunOutcome};

use crate::demo;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML file with settings; flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// debug, info, warning, error, critical or none.
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Address the command socket binds to.
    #[arg(long)]
    pub sockethost: Option<String>,

    #[arg(long)]
    pub socketport: Option<u16>,

    /// Flush interval in seconds; outside (0, 10) means 0.5.
    #[arg(long, allow_negative_numbers = true)]
    pub cycle: Option<f64>,

    /// Controller callback URL.
    #[arg(long)]
    pub callback: Option<String>,

    #[arg(long)]
    pub apikey: Option<String>,

    /// PID file path.
    #[arg(long)]
    pub pid: Option<PathBuf>,
}

impl RunArgs {
    fn flag_layer(&self) -> ConfigFile {
        ConfigFile {
            socket_host: self.sockethost.clone(),
            socket_port: self.socketport,
            callback_url: self.callback.clone(),
            api_key: self.apikey.clone(),
            cycle: self.cycle,
            pid_file: self.pid.clone(),
            log_level: self.loglevel.clone(),
            ..ConfigFile::default()
        }
    }

    pub fn resolve(&self) -> Result<DaemonConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        file.merge(self.flag_layer())
            .resolve()
            .context("invalid daemon configuration")
    }

    pub fn run(self) -> Result<ExitCode> {
        let config = self.resolve()?;
        init_tracing(&config.log_level);

        tracing::info!("starting daemon");
        tracing::info!(level = %config.log_level, "log level");
        tracing::info!(
            host = %config.socket_host,
            port = config.socket_port,
            callback = %config.callback_url,
            cycle = ?config.flush_interval(),
            "configuration",
        );

        let pid = PidFile::create(&config.pid_file)
            .with_context(|| format!("failed to write pid file {}", config.pid_file.display()))?;

        let outcome = start_blocking(demo::daemon(config));
        pid.remove();

        let code = match outcome {
            Ok(RunOutcome::Stopped) => ExitCode::SUCCESS,
            Ok(RunOutcome::CallbackUnreachable) => ExitCode::FAILURE,
            Err(err) => {
                tracing::error!(error = %err, "fatal error");
                ExitCode::FAILURE
            }
        };
        tracing::info!("exit");
        Ok(code)
    }
}
