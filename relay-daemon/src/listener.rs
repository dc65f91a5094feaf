//! Inbound command socket.
//!
//! Plain TCP, one JSON document per connection, no framing: the peer writes
//! its message and half-closes. Nothing is ever written back.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use relay_core::config::DEFAULT_READ_TIMEOUT;

use crate::error::DaemonError;

/// Upper bound for one inbound message; anything longer is cut and fails to parse.
pub const MAX_MESSAGE_BYTES: u64 = 1024 * 1024;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback invoked with each decoded message.
pub type MessageHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// A bound command socket.
///
/// The daemon binds exactly one of these per process and hands it to the
/// accept task; binding the same address again fails with
/// [`DaemonError::Bind`] instead of producing a second listener.
#[derive(Debug)]
pub struct CommandListener {
    listener: TcpListener,
    addr: SocketAddr,
    read_timeout: Duration,
}

impl CommandListener {
    pub async fn bind(host: &str, port: u16) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| DaemonError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| DaemonError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        Ok(Self {
            listener,
            addr,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Drop connections whose peer has not half-closed within `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept until `shutdown_rx` fires. Open connections are abandoned on
    /// the way out and the socket is closed when `self` drops.
    pub async fn run(
        self,
        on_message: MessageHandler,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        tracing::info!(addr = %self.addr, "listening for commands");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            self.read_timeout,
                            on_message.clone(),
                        ));
                    }
                    Err(err) => {
                        // Per-connection failures (aborted handshakes, fd pressure)
                        // must not take the listener down.
                        tracing::warn!(error = %err, "accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "command connection task panicked");
                        }
                    }
                }
            }
        }

        connections.abort_all();
        tracing::info!(addr = %self.addr, "listening cancelled");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    read_timeout: Duration,
    on_message: MessageHandler,
) {
    let raw = match tokio::time::timeout(read_timeout, read_message(stream)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            tracing::warn!(peer = %peer, error = %err, "failed to read command");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer, timeout = ?read_timeout, "command read timed out");
            return;
        }
    };
    tracing::debug!(peer = %peer, bytes = raw.len(), "received command");

    let message: Value = match serde_json::from_slice(&raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(
                peer = %peer,
                error = %err,
                raw = %String::from_utf8_lossy(&raw),
                "invalid command JSON",
            );
            return;
        }
    };

    on_message(message).await;
}

/// Read until the peer half-closes, then drop (close) our side.
async fn read_message(stream: TcpStream) -> Result<Vec<u8>, DaemonError> {
    let mut raw = Vec::new();
    let mut limited = stream.take(MAX_MESSAGE_BYTES);
    limited
        .read_to_end(&mut raw)
        .await
        .map_err(|e| crate::error::io_err("command socket read", e))?;
    Ok(raw)
}
