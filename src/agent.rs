//! Agent setup and lifecycle management.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, SyncConfig};
use crate::dispatcher::Dispatcher;
use crate::error::SyncError;
use crate::reload::{CommandNameserver, Nameserver, ReloadScheduler};
use crate::sync::Synchronizer;
use crate::vcs::{GitTracker, NoopTracker, VersionTracker};
use crate::watch::{self, EtcdWatcher, EventSource};

/// Spawn `task`, tripping `shutdown` if it fails.
fn spawn_guarded<F>(
    name: &'static str,
    shutdown: CancellationToken,
    task: F,
) -> JoinHandle<Result<(), SyncError>>
where
    F: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            error!(task = name, error = %e, "task failed");
            shutdown.cancel();
        }
        result
    })
}

async fn join(
    name: &'static str,
    handle: JoinHandle<Result<(), SyncError>>,
) -> Result<(), SyncError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(SyncError::TaskPanicked(name, e.to_string())),
    }
}

/// Watches etcd and keeps the zone directory in sync.
pub struct SyncAgent<S, N> {
    config: Arc<SyncConfig>,
    source: S,
    nameserver: N,
    tracker: Arc<dyn VersionTracker>,
}

impl SyncAgent<EtcdWatcher, CommandNameserver> {
    /// Build the production agent: etcd watcher, command-driven nameserver
    /// control and (if enabled) git commits in the zone directory.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let source = EtcdWatcher::new(config.etcd.clone())?;
        let nameserver = CommandNameserver::new(config.named.clone());
        let tracker: Arc<dyn VersionTracker> = if config.sync.commit_changes {
            Arc::new(GitTracker::new(&config.sync.zone_dir))
        } else {
            Arc::new(NoopTracker)
        };

        Ok(Self::new(
            Arc::new(config.sync.clone()),
            source,
            nameserver,
            tracker,
        ))
    }
}

impl<S, N> SyncAgent<S, N>
where
    S: EventSource + 'static,
    N: Nameserver + 'static,
{
    /// Assemble an agent from its collaborators.
    pub fn new(
        config: Arc<SyncConfig>,
        source: S,
        nameserver: N,
        tracker: Arc<dyn VersionTracker>,
    ) -> Self {
        Self {
            config,
            source,
            nameserver,
            tracker,
        }
    }

    /// Run until `shutdown` is triggered or a fatal error occurs.
    ///
    /// On a graceful shutdown the watcher and dispatcher stop first and the
    /// reload scheduler then flushes any pending reload. On a fatal error the
    /// remaining tasks are aborted and the error is returned; no reload is
    /// attempted for a half-applied change.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncError> {
        info!(
            zone_dir = %self.config.zone_dir.display(),
            conf_dir = %self.config.conf_dir.display(),
            main_conf = %self.config.main_conf.display(),
            debounce = ?self.config.debounce(),
            "Starting autobind agent"
        );

        let (events_tx, events_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (scheduler, reload) = ReloadScheduler::new(self.nameserver, self.config.debounce());
        let dispatcher = Dispatcher::new(
            Synchronizer::new(self.config.clone()),
            events_rx,
            reload,
            self.tracker,
        );

        let reload_shutdown = CancellationToken::new();
        let reload_task = spawn_guarded(
            "reload scheduler",
            shutdown.clone(),
            scheduler.run(reload_shutdown.clone()),
        );
        let watch_task = spawn_guarded(
            "watch",
            shutdown.clone(),
            watch::run(self.source, events_tx, shutdown.clone()),
        );

        let dispatched = dispatcher.run(shutdown.clone()).await;
        if let Err(e) = dispatched {
            shutdown.cancel();
            watch_task.abort();
            reload_task.abort();
            return Err(e);
        }

        // Dispatcher stopped cleanly: shutdown requested or another task failed.
        shutdown.cancel();
        let watched = join("watch", watch_task).await;

        info!("Waiting for reload scheduler to stop...");
        reload_shutdown.cancel();
        let reloaded = join("reload scheduler", reload_task).await;

        reloaded?;
        watched?;
        info!("Agent stopped");
        Ok(())
    }
}
