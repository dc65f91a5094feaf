//! relayd: local command relay daemon.
//!
//! # Usage
//!
//! ```text
//! relayd run --callback <url> --apikey <key> [--socketport 55009] [--cycle 0.5] [--config relayd.yaml]
//! relayd send <action> --apikey <key> [--message <text>] [--socketport 55009]
//! ```

mod commands;
mod demo;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{run::RunArgs, send::SendArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "relayd",
    version,
    about = "Relay commands from a local socket to an HTTP callback",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground until SIGINT/SIGTERM.
    Run(RunArgs),

    /// Send one command to a running daemon.
    Send(SendArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Send(args) => args.run().map(|()| ExitCode::SUCCESS),
    }
}
