//! Outbound channel to the controller's HTTP callback.
//!
//! ```text
//! GET  <callback>?test=1&apikey=<key>   startup health check
//! POST <callback>?apikey=<key>          JSON body: drained batch or immediate payload
//! ```
//!
//! Delivery is best-effort and at-most-once: a failed POST is logged and the
//! payload is gone. Anything still pending (or in flight) when the flush loop
//! is cancelled is dropped with it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use relay_core::{clamp_cycle, ChangeAggregator, DaemonConfig};

use crate::error::DaemonError;

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; no request was made.
    Idle,
    /// The batch was accepted with HTTP 200.
    Delivered,
    /// The endpoint answered with a non-200 status; the batch is dropped.
    Rejected,
}

/// Cheap to clone; every clone shares the same HTTP client and pending tree.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    callback_url: String,
    api_key: String,
    cycle: Duration,
    changes: ChangeAggregator,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("callback_url", &self.inner.callback_url)
            .field("cycle", &self.inner.cycle)
            .field("pending", &self.inner.changes.len())
            .finish()
    }
}

impl Publisher {
    /// Build a publisher. `cycle_secs` outside `(0, 10)` becomes 0.5 s.
    pub fn new(
        callback_url: impl Into<String>,
        api_key: impl Into<String>,
        cycle_secs: f64,
    ) -> Result<Self, DaemonError> {
        Self::with_timeout(
            callback_url,
            api_key,
            cycle_secs,
            relay_core::config::DEFAULT_REQUEST_TIMEOUT,
        )
    }

    pub fn from_config(config: &DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_timeout(
            config.callback_url.clone(),
            config.api_key.clone(),
            config.cycle,
            config.request_timeout,
        )
    }

    fn with_timeout(
        callback_url: impl Into<String>,
        api_key: impl Into<String>,
        cycle_secs: f64,
        request_timeout: Duration,
    ) -> Result<Self, DaemonError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("relayd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                callback_url: callback_url.into(),
                api_key: api_key.into(),
                cycle: clamp_cycle(cycle_secs),
                changes: ChangeAggregator::new(),
            }),
        })
    }

    /// Effective flush interval after clamping.
    pub fn cycle(&self) -> Duration {
        self.inner.cycle
    }

    /// Pending change set shared with the flush loop.
    pub fn changes(&self) -> &ChangeAggregator {
        &self.inner.changes
    }

    /// Probe the callback endpoint. Never fails; any problem is logged and
    /// reported as `false`.
    pub async fn test_callback(&self) -> bool {
        let request = self
            .inner
            .client
            .get(&self.inner.callback_url)
            .query(&[("test", "1"), ("apikey", self.inner.api_key.as_str())]);

        match request.send().await {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                let status = resp.status();
                tracing::error!(
                    status = status.as_u16(),
                    reason = status.canonical_reason().unwrap_or(""),
                    "callback check failed, please check the network configuration",
                );
                false
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "callback unreachable, please check the network configuration",
                );
                false
            }
        }
    }

    /// POST `payload` right away, bypassing the pending tree.
    ///
    /// `Ok(false)` for a non-200 answer; transport failures are returned as
    /// errors for the caller to handle. No retry is attempted.
    pub async fn send(&self, payload: &Value) -> Result<bool, DaemonError> {
        tracing::debug!(payload = %payload, "sending to callback");
        let resp = self
            .inner
            .client
            .post(&self.inner.callback_url)
            .query(&[("apikey", self.inner.api_key.as_str())])
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            tracing::error!(
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or(""),
                "callback rejected payload",
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Queue a change for the next flush. `key` is `::`-delimited.
    pub fn record_change(&self, key: &str, value: impl Into<Value>) {
        self.inner.changes.record_key(key, value.into());
    }

    /// Drain the pending tree and ship it as one payload.
    pub async fn flush(&self) -> Result<FlushOutcome, DaemonError> {
        let batch = self.inner.changes.drain();
        if batch.is_empty() {
            return Ok(FlushOutcome::Idle);
        }
        if self.send(&Value::Object(batch)).await? {
            Ok(FlushOutcome::Delivered)
        } else {
            Ok(FlushOutcome::Rejected)
        }
    }

    /// Spawn the periodic flush loop. It runs until `shutdown_rx` fires.
    pub fn spawn_flush_task(
        &self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<Result<(), DaemonError>> {
        let publisher = self.clone();
        tokio::spawn(async move { publisher.flush_loop(shutdown_rx).await })
    }

    /// Drain-and-send every cycle until `shutdown_rx` fires. Failed cycles
    /// are logged; the next one starts fresh.
    pub async fn flush_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        tracing::debug!(cycle = ?self.inner.cycle, "flush loop started");
        let mut interval = tokio::time::interval(self.inner.cycle);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                // An in-flight batch is abandoned here.
                _ = shutdown_rx.recv() => break,
                result = self.flush() => match result {
                    Ok(FlushOutcome::Idle | FlushOutcome::Delivered) => {}
                    Ok(FlushOutcome::Rejected) => {
                        tracing::warn!("flush cycle dropped a rejected batch");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "flush cycle failed");
                    }
                },
            }
        }

        let dropped = self.inner.changes.len();
        if dropped > 0 {
            tracing::debug!(dropped, "flush loop cancelled with pending changes");
        } else {
            tracing::debug!("flush loop cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cycle_is_clamped_at_construction() {
        for secs in [0.0, -1.0, 15.0] {
            let publisher = Publisher::new("http://127.0.0.1:9/cb", "k", secs).expect("publisher");
            assert_eq!(publisher.cycle(), Duration::from_millis(500), "cycle {secs}");
        }
        let publisher = Publisher::new("http://127.0.0.1:9/cb", "k", 2.0).expect("publisher");
        assert_eq!(publisher.cycle(), Duration::from_secs(2));
    }

    #[test]
    fn clones_share_the_pending_tree() {
        let publisher = Publisher::new("http://127.0.0.1:9/cb", "k", 1.0).expect("publisher");
        let producer_side = publisher.clone();
        producer_side.record_change("hall::lamp", json!("on"));

        assert_eq!(publisher.changes().len(), 1);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_makes_no_request() {
        // Port 9 (discard) is never contacted: an attempt would surface as Err.
        let publisher = Publisher::new("http://127.0.0.1:9/cb", "k", 1.0).expect("publisher");
        let outcome = publisher.flush().await.expect("idle flush");
        assert_eq!(outcome, FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn flush_loop_exits_on_shutdown() {
        let publisher = Publisher::new("http://127.0.0.1:9/cb", "k", 0.1).expect("publisher");
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = publisher.spawn_flush_task(shutdown_tx.subscribe());

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(()).expect("subscriber alive");

        let joined = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("flush loop stopped in time");
        assert!(joined.expect("join").is_ok());
    }
}
