use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use relay_core::{CommandMessage, DaemonConfig};

use crate::dispatch::{action_handler, AbortOnDrop, ActionHandler, Dispatcher};
use crate::error::{io_err, DaemonError};
use crate::listener::{CommandListener, MessageHandler};
use crate::publisher::Publisher;

type TaskHandle = JoinHandle<Result<(), DaemonError>>;
type Tasks = Vec<(String, Role, TaskHandle)>;
type StartHook = Box<dyn FnOnce(&mut Producers, &Publisher) + Send>;
type StopHook = Box<dyn FnOnce() + Send>;

/// Whether a task's failure decides how [`Daemon::run`] ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Listener and publisher: the daemon cannot work without them.
    Core,
    /// Producers and the signal task: failures are logged only.
    Auxiliary,
}

/// Lifecycle of one daemon run.
///
/// `Idle → Starting → Ready → ShuttingDown → Stopped`, or straight from
/// `Starting` to `Stopped` when startup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// How [`Daemon::run`] ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shut down after a termination signal or [`ShutdownHandle::trigger`].
    Stopped,
    /// The startup health check failed; no task was ever started.
    CallbackUnreachable,
}

/// Triggers the same shutdown sequence as SIGINT/SIGTERM.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// Background producers started by the start hook.
///
/// Each producer receives its own shutdown receiver and is expected to
/// return once it fires; producers that do not are aborted after the
/// configured shutdown timeout. A panicking producer is logged when it
/// happens and never affects the daemon's exit status.
pub struct Producers {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(String, TaskHandle)>,
}

impl Producers {
    fn new(shutdown: broadcast::Sender<()>) -> Self {
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, producer: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let run = producer(self.shutdown.subscribe());
        tracing::debug!(producer = %name, "starting producer");
        let producer_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut task = AbortOnDrop(tokio::spawn(run));
            if let Err(err) = (&mut task.0).await {
                if err.is_panic() {
                    tracing::error!(producer = %producer_name, error = %err, "producer panicked");
                }
            }
            Ok(())
        });
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// The daemon: one publisher, one command listener, any number of producers.
pub struct Daemon {
    config: DaemonConfig,
    handlers: Vec<(String, ActionHandler)>,
    on_start: Option<StartHook>,
    on_stop: Option<StopHook>,
    shutdown_tx: broadcast::Sender<()>,
    // Held from construction so a trigger sent before `run` is not lost.
    shutdown_rx: broadcast::Receiver<()>,
    state_tx: watch::Sender<DaemonState>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let (state_tx, _) = watch::channel(DaemonState::Idle);
        Self {
            config,
            handlers: Vec::new(),
            on_start: None,
            on_stop: None,
            shutdown_tx,
            shutdown_rx,
            state_tx,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Register the handler for one action name.
    pub fn on_action<F, Fut>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CommandMessage, Publisher) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.push((action.into(), action_handler(handler)));
        self
    }

    /// Called once the listener and flush loop are running.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut Producers, &Publisher) + Send + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Called after every task has been cancelled, to release external resources.
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_stop = Some(Box::new(hook));
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> watch::Receiver<DaemonState> {
        self.state_tx.subscribe()
    }

    /// Run the daemon until shutdown.
    ///
    /// Startup order: publisher, callback check, listener task, flush task,
    /// start hook, signal handlers, grace delay, ready. Every exit path
    /// after the callback check goes through the same teardown and ends in
    /// [`DaemonState::Stopped`].
    pub async fn run(self) -> Result<RunOutcome, DaemonError> {
        let Daemon {
            config,
            handlers,
            on_start,
            on_stop,
            shutdown_tx,
            mut shutdown_rx,
            state_tx,
        } = self;

        state_tx.send_replace(DaemonState::Starting);

        let publisher = match Publisher::from_config(&config) {
            Ok(publisher) => publisher,
            Err(err) => {
                state_tx.send_replace(DaemonState::Stopped);
                return Err(err);
            }
        };

        if !publisher.test_callback().await {
            tracing::error!(callback = %config.callback_url, "callback check failed, not starting");
            state_tx.send_replace(DaemonState::Stopped);
            return Ok(RunOutcome::CallbackUnreachable);
        }

        let mut tasks: Tasks = Vec::new();
        let started = start_tasks(
            &config,
            &publisher,
            handlers,
            on_start,
            &shutdown_tx,
            &mut tasks,
        )
        .await;

        let mut failure = None;
        match started {
            Ok(started) => {
                let ready = tokio::select! {
                    _ = shutdown_rx.recv() => false,
                    _ = tokio::time::sleep(config.startup_grace) => true,
                };
                if ready {
                    state_tx.send_replace(DaemonState::Ready);
                    tracing::info!(
                        socket = %started.addr,
                        producers = started.producers,
                        "ready",
                    );
                    let _ = shutdown_rx.recv().await;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "startup failed");
                failure = Some(err);
            }
        }

        state_tx.send_replace(DaemonState::ShuttingDown);
        tracing::debug!("cancel all tasks");
        let _ = shutdown_tx.send(());

        for (name, role, handle) in tasks {
            if let Err(err) = join_task(&name, handle, config.shutdown_timeout).await {
                tracing::error!(task = %name, error = %err, "task ended with error");
                if role == Role::Core {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(hook) = on_stop {
            if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!("stop hook panicked");
            }
        }

        state_tx.send_replace(DaemonState::Stopped);
        tracing::info!("daemon stopped");

        match failure {
            Some(err) => Err(err),
            None => Ok(RunOutcome::Stopped),
        }
    }
}

/// Start the daemon on a fresh multi-threaded runtime and block until it exits.
pub fn start_blocking(daemon: Daemon) -> Result<RunOutcome, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let outcome = runtime.block_on(daemon.run());
    runtime.shutdown_timeout(Duration::from_secs(1));
    outcome
}

struct Started {
    addr: SocketAddr,
    producers: usize,
}

/// Startup steps 3 to 6: listener, flush loop, start hook, signal handlers.
/// Tasks spawned before a failure (including a panicking start hook) are
/// left in `tasks` for teardown.
async fn start_tasks(
    config: &DaemonConfig,
    publisher: &Publisher,
    handlers: Vec<(String, ActionHandler)>,
    on_start: Option<StartHook>,
    shutdown_tx: &broadcast::Sender<()>,
    tasks: &mut Tasks,
) -> Result<Started, DaemonError> {
    let listener = CommandListener::bind(&config.socket_host, config.socket_port)
        .await?
        .with_read_timeout(config.read_timeout);
    let addr = listener.local_addr();

    let mut dispatcher = Dispatcher::new(config.api_key.clone(), publisher.clone());
    for (action, handler) in handlers {
        dispatcher.register(action, handler);
    }
    let dispatcher = Arc::new(dispatcher);
    let on_message: MessageHandler = Arc::new(move |raw| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            dispatcher.dispatch(raw).await;
        })
    });

    let listen_rx = shutdown_tx.subscribe();
    tasks.push((
        "listener".to_string(),
        Role::Core,
        spawn_supervised(shutdown_tx, listener.run(on_message, listen_rx)),
    ));

    let flush_rx = shutdown_tx.subscribe();
    let flusher = publisher.clone();
    tasks.push((
        "publisher".to_string(),
        Role::Core,
        spawn_supervised(shutdown_tx, async move { flusher.flush_loop(flush_rx).await }),
    ));

    let mut producers = Producers::new(shutdown_tx.clone());
    let hooked = match on_start {
        Some(hook) => std::panic::catch_unwind(AssertUnwindSafe(|| hook(&mut producers, publisher))),
        None => Ok(()),
    };
    let producer_count = producers.len();
    tasks.extend(
        producers
            .tasks
            .into_iter()
            .map(|(name, handle)| (name, Role::Auxiliary, handle)),
    );
    if hooked.is_err() {
        return Err(DaemonError::HookPanicked { hook: "start" });
    }

    let signals = TerminationSignals::register()?;
    let signal_rx = shutdown_tx.subscribe();
    let signal_tx = shutdown_tx.clone();
    tasks.push((
        "signals".to_string(),
        Role::Auxiliary,
        tokio::spawn(signal_task(signals, signal_tx, signal_rx)),
    ));

    Ok(Started {
        addr,
        producers: producer_count,
    })
}

/// Spawn a long-running task; when it ends for any reason the whole daemon
/// is asked to shut down.
fn spawn_supervised<F>(shutdown: &broadcast::Sender<()>, task: F) -> TaskHandle
where
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = task.await;
        let _ = shutdown.send(());
        result
    })
}

async fn signal_task(
    mut signals: TerminationSignals,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        name = signals.recv() => {
            tracing::info!(signal = name, "signal caught, exiting");
            let _ = shutdown_tx.send(());
        }
    }
    Ok(())
}

struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    #[cfg(unix)]
    fn register() -> Result<Self, DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?,
            terminate: signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    fn register() -> Result<Self, DaemonError> {
        Ok(Self {})
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}

async fn join_task(name: &str, mut handle: TaskHandle, timeout: Duration) -> Result<(), DaemonError> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => handle_join(name, joined),
        Err(_) => {
            tracing::warn!(task = name, "task did not stop in time, aborting");
            handle.abort();
            Ok(())
        }
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(DaemonError::Join {
            task: task.to_string(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn producers_observe_shutdown() {
        let (shutdown_tx, _) = broadcast::channel(4);
        let mut producers = Producers::new(shutdown_tx.clone());
        producers.spawn("ticker", |mut shutdown| async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {}
                }
            }
        });
        assert_eq!(producers.len(), 1);

        shutdown_tx.send(()).expect("producer subscribed");
        for (name, handle) in producers.tasks {
            join_task(&name, handle, Duration::from_secs(1))
                .await
                .expect("producer stopped cleanly");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_producer_is_aborted_after_timeout() {
        let (shutdown_tx, _) = broadcast::channel(4);
        let mut producers = Producers::new(shutdown_tx.clone());
        producers.spawn("stubborn", |_shutdown| async move {
            std::future::pending::<()>().await;
        });

        shutdown_tx.send(()).expect("producer subscribed");
        let (name, handle) = producers.tasks.pop().expect("one producer");
        let abort = handle.abort_handle();
        join_task(&name, handle, Duration::from_millis(100))
            .await
            .expect("timeout is not an error");
        while !abort.is_finished() {
            tokio::task::yield_now().await;
        }
    }

    async fn exploding_task() -> Result<(), DaemonError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_task_is_reported_as_join_failure() {
        let handle = tokio::spawn(exploding_task());
        let err = join_task("listener", handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Join { ref task, .. } if task == "listener"), "got: {err}");
    }

    #[tokio::test]
    async fn supervised_task_exit_requests_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(4);
        let handle = spawn_supervised(&shutdown_tx, async {
            Err::<(), _>(DaemonError::Protocol("accept loop died".into()))
        });

        tokio::time::timeout(Duration::from_secs(1), shutdown_rx.recv())
            .await
            .expect("shutdown requested")
            .expect("channel open");
        assert!(handle.await.expect("join").is_err());
    }

    async fn exploding_producer(_shutdown: broadcast::Receiver<()>) {
        panic!("producer bug")
    }

    #[tokio::test]
    async fn panicking_producer_joins_cleanly() {
        let (shutdown_tx, _) = broadcast::channel(4);
        let mut producers = Producers::new(shutdown_tx.clone());
        producers.spawn("buggy", exploding_producer);

        let (name, handle) = producers.tasks.pop().expect("one producer");
        join_task(&name, handle, Duration::from_secs(1))
            .await
            .expect("producer panic is not a join failure");
    }

    #[test]
    fn new_daemon_is_idle() {
        let daemon = Daemon::new(DaemonConfig::new("http://127.0.0.1/cb", "k"));
        assert_eq!(*daemon.state().borrow(), DaemonState::Idle);
    }
}
