use std::net::SocketAddr;

use thiserror::Error;

/// Error surface for the daemon runtime, publisher, listener, and command client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind command socket {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (nothing listening on {addr})")]
    DaemonNotRunning { addr: SocketAddr },

    #[error("{task} task join failure: {reason}")]
    Join { task: String, reason: String },

    #[error("{hook} hook panicked")]
    HookPanicked { hook: &'static str },
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        context: context.into(),
        source,
    }
}
