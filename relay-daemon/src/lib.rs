//! Relay daemon runtime: command socket + batched HTTP publisher + producers.

pub mod dispatch;
mod error;
pub mod listener;
pub mod logging;
pub mod pidfile;
pub mod protocol;
pub mod publisher;
mod runtime;

pub use dispatch::{action_handler, ActionHandler, DispatchOutcome, Dispatcher, Route};
pub use error::DaemonError;
pub use listener::CommandListener;
pub use logging::init_tracing;
pub use pidfile::PidFile;
pub use protocol::send_command;
pub use publisher::{FlushOutcome, Publisher};
pub use runtime::{
    start_blocking, Daemon, DaemonState, Producers, RunOutcome, ShutdownHandle,
};
