//! Single consumer of the event queue.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::metrics::{self, EventResult, Timer};
use crate::record::{ChangeEvent, Record};
use crate::reload::ReloadHandle;
use crate::sync::{Synchronizer, TouchedFiles};
use crate::vcs::{self, VersionTracker};

/// Pulls events off the queue one at a time and applies them.
pub struct Dispatcher {
    synchronizer: Synchronizer,
    events: mpsc::Receiver<ChangeEvent>,
    reload: ReloadHandle,
    tracker: Arc<dyn VersionTracker>,
}

impl Dispatcher {
    /// Create a dispatcher draining `events`.
    pub fn new(
        synchronizer: Synchronizer,
        events: mpsc::Receiver<ChangeEvent>,
        reload: ReloadHandle,
        tracker: Arc<dyn VersionTracker>,
    ) -> Self {
        Self {
            synchronizer,
            events,
            reload,
            tracker,
        }
    }

    /// Process events in arrival order until shutdown or the queue closes.
    ///
    /// Returns the first fatal error; malformed keys are logged and skipped.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SyncError> {
        loop {
            debug!("waiting for event");
            let event = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    return Ok(());
                }

                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event queue closed");
                        return Ok(());
                    }
                }
            };

            metrics::record_queue_depth(self.events.len());
            self.handle(event).await?;
        }
    }

    /// Process a single event.
    ///
    /// Returns the zones touched, or `None` if the key was rejected.
    pub async fn handle(&self, event: ChangeEvent) -> Result<Option<TouchedFiles>, SyncError> {
        let timer = Timer::start();
        info!(key = %event.key, action = %event.action, "processing event");

        let record = match Record::parse(&event.key) {
            Ok(record) => record,
            Err(rejected) => {
                warn!(key = %event.key, reason = %rejected, "dropping event with malformed key");
                metrics::record_event(event.action, EventResult::Rejected, timer.elapsed());
                return Ok(None);
            }
        };

        let result = self.apply(&record, &event).await;
        match &result {
            Ok(_) => metrics::record_event(event.action, EventResult::Applied, timer.elapsed()),
            Err(e) => {
                error!(key = %event.key, action = %event.action, error = %e, "event failed");
                metrics::record_event(event.action, EventResult::Failed, timer.elapsed());
            }
        }
        result.map(Some)
    }

    async fn apply(&self, record: &Record, event: &ChangeEvent) -> Result<TouchedFiles, SyncError> {
        // Zone edits are blocking file IO with fsync; keep them off the workers.
        let synchronizer = self.synchronizer.clone();
        let record = record.clone();
        let action = event.action;
        let touched = tokio::task::spawn_blocking(move || synchronizer.apply(&record, action))
            .await
            .map_err(|e| SyncError::TaskPanicked("zone update", e.to_string()))??;
        self.reload.request()?;
        self.tracker.record(&touched, &vcs::commit_message()).await?;
        Ok(touched)
    }
}
