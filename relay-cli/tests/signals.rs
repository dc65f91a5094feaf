//! `relayd run` against a mock callback, stopped with a real signal.

#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct DaemonProcess {
    child: Child,
    ready: mpsc::Receiver<()>,
}

impl DaemonProcess {
    fn start(callback: &str, port: u16, pid: &Path) -> Self {
        let mut child = Command::new(assert_cmd::cargo::cargo_bin("relayd"))
            .args(["run", "--apikey", "secret", "--loglevel", "info"])
            .args(["--callback", callback])
            .args(["--socketport", &port.to_string()])
            .arg("--pid")
            .arg(pid)
            .env_remove("RUST_LOG")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn relayd");

        // Keep draining stdout so the daemon never blocks on a full pipe.
        let stdout = child.stdout.take().expect("piped stdout");
        let (tx, ready) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if line.contains("ready") {
                    let _ = tx.send(());
                }
            }
        });

        Self { child, ready }
    }

    fn signal(&self, name: &str) {
        let status = Command::new("kill")
            .arg(format!("-{name}"))
            .arg(self.child.id().to_string())
            .status()
            .expect("run kill");
        assert!(status.success(), "kill -{name} failed");
    }

    fn wait(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    probe.local_addr().expect("addr").port()
}

async fn healthy_callback() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

/// Start the daemon, wait for readiness, send `signal`, return the exit status.
async fn run_until_signal(signal: &'static str, pid: PathBuf) -> ExitStatus {
    let server = healthy_callback().await;
    let callback = format!("{}/callback", server.uri());
    let port = free_port();

    let status = tokio::task::spawn_blocking(move || {
        let mut daemon = DaemonProcess::start(&callback, port, &pid);
        daemon
            .ready
            .recv_timeout(Duration::from_secs(15))
            .expect("daemon reported ready");
        assert!(pid.exists(), "pid file written while running");

        daemon.signal(signal);
        daemon
            .wait(Duration::from_secs(15))
            .expect("daemon exited after signal")
    })
    .await
    .expect("join");

    drop(server);
    status
}

#[tokio::test(flavor = "multi_thread")]
async fn sigterm_exits_zero_and_removes_pid_file() {
    let dir = TempDir::new().expect("tempdir");
    let pid = dir.path().join("relayd.pid");

    let status = run_until_signal("TERM", pid.clone()).await;

    assert_eq!(status.code(), Some(0), "status: {status}");
    assert!(!pid.exists(), "pid file removed on exit");
}

#[tokio::test(flavor = "multi_thread")]
async fn sigint_exits_zero_and_removes_pid_file() {
    let dir = TempDir::new().expect("tempdir");
    let pid = dir.path().join("relayd.pid");

    let status = run_until_signal("INT", pid.clone()).await;

    assert_eq!(status.code(), Some(0), "status: {status}");
    assert!(!pid.exists(), "pid file removed on exit");
}
