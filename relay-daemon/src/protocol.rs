//! Client side of the command socket: one JSON message per connection.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use relay_core::CommandMessage;

use crate::error::{io_err, DaemonError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Send one command to a running daemon and close the connection.
///
/// The daemon never answers; success only means the bytes were handed off.
pub fn send_command(host: &str, port: u16, message: &CommandMessage) -> Result<(), DaemonError> {
    let addr = resolve(host, port)?;
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning { addr }
        } else {
            io_err(format!("connect {addr}"), err)
        }
    })?;

    let payload = serde_json::to_vec(message)?;
    stream
        .write_all(&payload)
        .map_err(|e| io_err("command socket write", e))?;
    stream
        .flush()
        .map_err(|e| io_err("command socket flush", e))?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(|e| io_err("command socket shutdown", e))?;
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, DaemonError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| io_err(format!("resolve {host}:{port}"), e))?
        .next()
        .ok_or_else(|| DaemonError::Protocol(format!("no address for {host}:{port}")))
}
