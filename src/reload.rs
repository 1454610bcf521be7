//! Debounced nameserver reloads.
//!
//! ```text
//!            request                     deadline reached
//!   Idle ─────────────▶ PendingReload ─────────────────────▶ check + reload
//!    ▲                    │  ▲                                     │
//!    │                    └──┘ further requests absorbed           │
//!    └──────────────── drain requests queued during reload ◀───────┘
//! ```
//!
//! The window starts at the first request of a burst and is not extended by
//! later ones, so a steady stream of changes still reloads every window.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NamedConfig;
use crate::error::SyncError;
use crate::metrics;

/// Capacity of the reload request channel. Requests beyond it are redundant.
const REQUEST_CAPACITY: usize = 64;

/// Control over the running nameserver.
#[async_trait]
pub trait Nameserver: Send + Sync {
    /// Check the configuration (and the zones it references) for errors.
    async fn validate_config(&self) -> Result<(), SyncError>;

    /// Tell the nameserver to reload its configuration and zones.
    async fn reload(&self) -> Result<(), SyncError>;
}

/// [`Nameserver`] driven by external commands (`named-checkconf`, `systemctl reload named`).
#[derive(Debug, Clone)]
pub struct CommandNameserver {
    config: NamedConfig,
}

impl CommandNameserver {
    /// Create a nameserver controller from configured command lines.
    pub fn new(config: NamedConfig) -> Self {
        Self { config }
    }
}

/// Run `argv`, returning a description of the failure if it did not exit cleanly.
async fn run_command(argv: &[String]) -> Result<(), String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    debug!(command = ?argv, "running command");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(format!(
            "{program} exited with {}: {}{}",
            output.status,
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(())
}

#[async_trait]
impl Nameserver for CommandNameserver {
    async fn validate_config(&self) -> Result<(), SyncError> {
        run_command(&self.config.check_command)
            .await
            .map_err(SyncError::ConfigValidation)
    }

    async fn reload(&self) -> Result<(), SyncError> {
        run_command(&self.config.reload_command)
            .await
            .map_err(SyncError::Reload)
    }
}

/// Sending side of the reload queue.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Ask for a reload. Never blocks.
    pub fn request(&self) -> Result<(), SyncError> {
        match self.tx.try_send(()) {
            // A full queue already guarantees a reload.
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::QueueClosed("reload")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadState {
    Idle,
    PendingReload { deadline: Instant, requests: usize },
}

/// Coalesces reload requests and runs check + reload once per burst.
pub struct ReloadScheduler<N> {
    nameserver: N,
    debounce: Duration,
    requests: mpsc::Receiver<()>,
}

impl<N: Nameserver> ReloadScheduler<N> {
    /// Create a scheduler and the handle used to feed it.
    pub fn new(nameserver: N, debounce: Duration) -> (Self, ReloadHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let scheduler = Self {
            nameserver,
            debounce,
            requests,
        };
        (scheduler, ReloadHandle { tx })
    }

    /// Run until shutdown or until every [`ReloadHandle`] is dropped.
    ///
    /// A reload that is pending when either happens is carried out before
    /// returning. Check or reload failures are returned as fatal errors.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SyncError> {
        let mut state = ReloadState::Idle;

        loop {
            state = match state {
                ReloadState::Idle => {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            debug!("reload scheduler shutting down");
                            return Ok(());
                        }

                        request = self.requests.recv() => match request {
                            Some(()) => {
                                info!(debounce = ?self.debounce, "nameserver reload scheduled");
                                ReloadState::PendingReload {
                                    deadline: Instant::now() + self.debounce,
                                    requests: 1,
                                }
                            }
                            None => return Ok(()),
                        }
                    }
                }
                ReloadState::PendingReload { deadline, requests } => {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            info!("flushing pending reload before shutdown");
                            self.reload_now(requests).await?;
                            return Ok(());
                        }

                        _ = sleep_until(deadline) => {
                            self.reload_now(requests).await?;
                            let drained = self.drain();
                            if drained > 0 {
                                debug!(drained, "discarded requests queued during reload");
                            }
                            ReloadState::Idle
                        }

                        request = self.requests.recv() => match request {
                            Some(()) => ReloadState::PendingReload {
                                deadline,
                                requests: requests + 1,
                            },
                            None => {
                                self.reload_now(requests).await?;
                                return Ok(());
                            }
                        }
                    }
                }
            };
        }
    }

    /// Discard queued requests without waiting.
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.requests.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    async fn reload_now(&self, requests: usize) -> Result<(), SyncError> {
        let result = async {
            self.nameserver.validate_config().await?;
            self.nameserver.reload().await
        }
        .await;

        metrics::record_reload(result.is_ok(), requests);
        match &result {
            Ok(()) => warn!(coalesced = requests, "nameserver reloaded"),
            Err(e) => error!(error = %e, "nameserver reload failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Calls {
        checks: AtomicUsize,
        reloads: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct FakeNameserver {
        calls: Arc<Calls>,
        fail_check: bool,
    }

    #[async_trait]
    impl Nameserver for FakeNameserver {
        async fn validate_config(&self) -> Result<(), SyncError> {
            self.calls.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_check {
                return Err(SyncError::ConfigValidation("bad zone".into()));
            }
            Ok(())
        }

        async fn reload(&self) -> Result<(), SyncError> {
            self.calls.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reloads(ns: &FakeNameserver) -> usize {
        ns.calls.reloads.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_reload() {
        let ns = FakeNameserver::default();
        let (scheduler, handle) = ReloadScheduler::new(ns.clone(), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(shutdown.clone()));

        for _ in 0..10 {
            handle.request().unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(reloads(&ns), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reloads(&ns), 1);
        assert_eq!(ns.calls.checks.load(Ordering::SeqCst), 1);

        // Quiet afterwards: nothing more happens.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(reloads(&ns), 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_not_extended_by_later_requests() {
        let ns = FakeNameserver::default();
        let (scheduler, handle) = ReloadScheduler::new(ns.clone(), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(shutdown.clone()));

        handle.request().unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        handle.request().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(reloads(&ns), 1);

        handle.request().unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(reloads(&ns), 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_failure_is_fatal() {
        let ns = FakeNameserver {
            fail_check: true,
            ..Default::default()
        };
        let (scheduler, handle) = ReloadScheduler::new(ns.clone(), Duration::from_secs(5));
        let task = tokio::spawn(scheduler.run(CancellationToken::new()));

        handle.request().unwrap();
        let result = task.await.unwrap();

        assert!(matches!(result, Err(SyncError::ConfigValidation(_))));
        assert_eq!(reloads(&ns), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reload_flushed_on_shutdown() {
        let ns = FakeNameserver::default();
        let (scheduler, handle) = ReloadScheduler::new(ns.clone(), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(shutdown.clone()));

        handle.request().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(reloads(&ns), 1);
    }

    #[tokio::test]
    async fn test_closed_scheduler_rejects_requests() {
        let (scheduler, handle) =
            ReloadScheduler::new(FakeNameserver::default(), Duration::from_secs(5));
        drop(scheduler);
        assert!(matches!(handle.request(), Err(SyncError::QueueClosed("reload"))));
    }

    #[tokio::test]
    async fn test_command_nameserver_reports_failures() {
        let ns = CommandNameserver::new(NamedConfig {
            check_command: vec!["true".into()],
            reload_command: vec!["false".into()],
        });
        ns.validate_config().await.unwrap();
        assert!(matches!(ns.reload().await, Err(SyncError::Reload(_))));

        let empty = CommandNameserver::new(NamedConfig {
            check_command: vec![],
            reload_command: vec![],
        });
        assert!(matches!(
            empty.validate_config().await,
            Err(SyncError::ConfigValidation(_))
        ));
    }
}
