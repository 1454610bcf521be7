//! etcd watch feeding the event queue.
//!
//! Uses the etcd v2 keys API long poll:
//!
//! ```text
//! GET /v2/keys/dns/?wait=true&recursive=true&waitIndex=<last modifiedIndex + 1>
//!   → {"action": "set", "node": {"key": "/dns/...", "modifiedIndex": 42}}
//! ```
//!
//! A poll that outlives the watch timeout is not an error; the watch is
//! simply issued again from the same index.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EtcdConfig;
use crate::error::SyncError;
use crate::metrics::{self, ReconnectReason};
use crate::record::{Action, ChangeEvent};

/// etcd error code for a wait index older than the retained event history.
const ECODE_EVENT_INDEX_CLEARED: u32 = 401;

const MAX_BACKOFF: u64 = 30;

/// Result of one watch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A key changed.
    Event(ChangeEvent),
    /// Nothing happened within the watch timeout.
    TimedOut,
    /// Something happened that does not concern records (directory nodes,
    /// unknown actions, a reset wait index).
    Ignored,
}

/// Source of change notifications.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next notification.
    async fn next_event(&mut self) -> Result<WatchOutcome, SyncError>;
}

#[derive(Debug, Deserialize)]
struct WatchResponse {
    action: String,
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    key: String,
    #[serde(default)]
    modified_index: Option<u64>,
    #[serde(default)]
    dir: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: u32,
    message: String,
    #[serde(default)]
    index: Option<u64>,
}

/// Long-polling etcd v2 watcher.
pub struct EtcdWatcher {
    client: reqwest::Client,
    config: EtcdConfig,
    endpoint: usize,
    wait_index: Option<u64>,
}

impl EtcdWatcher {
    /// Create a watcher for `config.prefix` across `config.endpoints`.
    pub fn new(config: EtcdConfig) -> Result<Self, SyncError> {
        if config.endpoints.is_empty() {
            return Err(SyncError::Config("no etcd endpoints configured".into()));
        }
        let root = config.prefix.trim_matches('/');
        if root.is_empty() || root.contains('/') {
            return Err(SyncError::Config(format!(
                "etcd prefix {:?} must be a single segment like \"/dns/\"",
                config.prefix
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.watch_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            endpoint: 0,
            wait_index: None,
        })
    }

    /// Index the next watch waits from, if any event has been seen.
    pub fn wait_index(&self) -> Option<u64> {
        self.wait_index
    }

    fn watch_url(&self) -> String {
        let endpoint = self.config.endpoints[self.endpoint].trim_end_matches('/');
        let prefix = self.config.prefix.trim_start_matches('/');
        format!("{endpoint}/v2/keys/{prefix}")
    }

    fn rotate_endpoint(&mut self) {
        self.endpoint = (self.endpoint + 1) % self.config.endpoints.len();
    }

    fn handle_event(&mut self, body: &str) -> Result<WatchOutcome, SyncError> {
        let response: WatchResponse = serde_json::from_str(body)?;
        if let Some(index) = response.node.modified_index {
            self.wait_index = Some(index + 1);
        }

        if response.node.dir {
            debug!(key = %response.node.key, "ignoring directory change");
            return Ok(WatchOutcome::Ignored);
        }

        match Action::from_etcd(&response.action) {
            Some(action) => Ok(WatchOutcome::Event(ChangeEvent::new(
                response.node.key,
                action,
            ))),
            None => {
                warn!(
                    key = %response.node.key,
                    action = %response.action,
                    "ignoring unsupported etcd action"
                );
                Ok(WatchOutcome::Ignored)
            }
        }
    }

    fn handle_error(&mut self, status: StatusCode, body: &str) -> Result<WatchOutcome, SyncError> {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(err) if err.error_code == ECODE_EVENT_INDEX_CLEARED => {
                warn!(
                    wait_index = ?self.wait_index,
                    etcd_index = ?err.index,
                    "watch index cleared from history, resuming from current index"
                );
                metrics::record_watch_reconnect(ReconnectReason::IndexCleared);
                self.wait_index = err.index.map(|i| i + 1);
                Ok(WatchOutcome::Ignored)
            }
            Ok(err) => Err(SyncError::Watch(format!(
                "etcd returned {status}: {} (code {})",
                err.message, err.error_code
            ))),
            Err(_) => Err(SyncError::Watch(format!("etcd returned {status}: {body}"))),
        }
    }
}

#[async_trait]
impl EventSource for EtcdWatcher {
    async fn next_event(&mut self) -> Result<WatchOutcome, SyncError> {
        let mut query = vec![("wait", "true".to_string()), ("recursive", "true".to_string())];
        if let Some(index) = self.wait_index {
            query.push(("waitIndex", index.to_string()));
        }

        let url = self.watch_url();
        debug!(%url, wait_index = ?self.wait_index, "watching");

        let response = match self.client.get(&url).query(&query).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(WatchOutcome::TimedOut),
            Err(e) => {
                self.rotate_endpoint();
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Ok(WatchOutcome::TimedOut),
            Err(e) => {
                self.rotate_endpoint();
                return Err(e.into());
            }
        };

        if status.is_success() {
            self.handle_event(&body)
        } else {
            self.handle_error(status, &body)
        }
    }
}

/// Feed events from `source` into `events` until shutdown.
///
/// Watch failures are retried with exponential backoff. Only a closed event
/// queue ends the loop with an error.
pub async fn run<S: EventSource>(
    mut source: S,
    events: mpsc::Sender<ChangeEvent>,
    shutdown: CancellationToken,
) -> Result<(), SyncError> {
    let mut backoff_secs = 1u64;

    info!("Starting watch");
    loop {
        let outcome = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Watch shutting down");
                return Ok(());
            }

            outcome = source.next_event() => outcome,
        };

        match outcome {
            Ok(WatchOutcome::Event(event)) => {
                backoff_secs = 1;
                debug!(key = %event.key, action = %event.action, "queueing event");
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return Ok(()),

                    sent = events.send(event) => {
                        if sent.is_err() {
                            return Err(SyncError::QueueClosed("event"));
                        }
                    }
                }
            }
            Ok(WatchOutcome::TimedOut) => {
                backoff_secs = 1;
                debug!("watch timed out, watching again");
                metrics::record_watch_timeout();
            }
            Ok(WatchOutcome::Ignored) => {
                backoff_secs = 1;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs, "watch failed");
                metrics::record_watch_reconnect(ReconnectReason::Error);
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return Ok(()),
                    _ = sleep(Duration::from_secs(backoff_secs)) => {}
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF);
            }
        }
    }
}
