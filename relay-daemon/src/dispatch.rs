//! Authentication and routing of inbound commands.
//!
//! Handlers are registered by action name when the daemon is built. Routing
//! is a closed choice between a registered handler and the unrecognized
//! fallback; nothing is sent back to the peer in either case.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use relay_core::CommandMessage;

use crate::listener::BoxFuture;
use crate::publisher::Publisher;

/// Async action handler. Gets the decoded command and a publisher handle.
pub type ActionHandler =
    Arc<dyn Fn(CommandMessage, Publisher) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box a plain async closure into an [`ActionHandler`].
pub fn action_handler<F, Fut>(handler: F) -> ActionHandler
where
    F: Fn(CommandMessage, Publisher) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |message, publisher| Box::pin(handler(message, publisher)))
}

/// Where an action name leads.
pub enum Route<'a> {
    Registered(&'a ActionHandler),
    Unrecognized,
}

/// What happened to one inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled { action: String },
    /// Not a JSON object with string `apikey` and `action`.
    Malformed,
    Unauthorized,
    UnknownAction(String),
    Failed { action: String, error: String },
}

pub struct Dispatcher {
    api_key: String,
    publisher: Publisher,
    handlers: HashMap<String, ActionHandler>,
}

impl Dispatcher {
    pub fn new(api_key: impl Into<String>, publisher: Publisher) -> Self {
        Self {
            api_key: api_key.into(),
            publisher,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `action`, replacing any earlier registration.
    pub fn register(&mut self, action: impl Into<String>, handler: ActionHandler) {
        self.handlers.insert(action.into(), handler);
    }

    pub fn route(&self, action: &str) -> Route<'_> {
        match self.handlers.get(action) {
            Some(handler) => Route::Registered(handler),
            None => Route::Unrecognized,
        }
    }

    /// Authenticate and run one command to completion.
    ///
    /// Handler errors and panics are contained here and reported as
    /// [`DispatchOutcome::Failed`].
    pub async fn dispatch(&self, raw: Value) -> DispatchOutcome {
        let message = match CommandMessage::from_value(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "malformed command dropped");
                return DispatchOutcome::Malformed;
            }
        };

        if message.apikey != self.api_key {
            tracing::error!(action = %message.action, "invalid apikey from socket");
            return DispatchOutcome::Unauthorized;
        }

        let action = message.action.clone();
        let handler = match self.route(&action) {
            Route::Registered(handler) => handler.clone(),
            Route::Unrecognized => {
                tracing::warn!(action = %action, "unknown action");
                return DispatchOutcome::UnknownAction(action);
            }
        };

        tracing::debug!(action = %action, "dispatching command");
        let mut task = AbortOnDrop(tokio::spawn(handler(message, self.publisher.clone())));
        let joined = (&mut task.0).await;

        match joined {
            Ok(Ok(())) => DispatchOutcome::Handled { action },
            Ok(Err(err)) => {
                let error = format!("{err:#}");
                tracing::error!(action = %action, error = %error, "command handler failed");
                DispatchOutcome::Failed { action, error }
            }
            Err(err) => {
                tracing::error!(action = %action, error = %err, "command handler panicked");
                DispatchOutcome::Failed {
                    action,
                    error: err.to_string(),
                }
            }
        }
    }
}

/// Aborts the wrapped task when the owner is dropped or aborted itself.
pub(crate) struct AbortOnDrop<T>(pub(crate) tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
