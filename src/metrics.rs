//! Metrics instrumentation for etcd-autobind.
//!
//! All metrics are prefixed with `autobind.`

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

use crate::layout::ZoneKind;
use crate::record::Action;

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_counter!("autobind.event.count", "Watch events dispatched, by action and result");
    describe_histogram!(
        "autobind.event.duration.seconds",
        metrics::Unit::Seconds,
        "Time spent applying one event"
    );
    describe_counter!("autobind.zone.update.count", "Zone file edits, by zone kind and result");
    describe_counter!("autobind.reload.count", "Nameserver reload attempts");
    describe_histogram!(
        "autobind.reload.coalesced_requests",
        "Reload requests folded into one reload"
    );
    describe_counter!("autobind.watch.reconnect.count", "etcd watch reconnects, by reason");
    describe_counter!("autobind.watch.timeout.count", "etcd long polls that timed out");
    describe_gauge!("autobind.queue.depth", "Events waiting in the dispatch queue");
    describe_counter!("autobind.vcs.commit.count", "Zone directory commits");
    describe_histogram!("autobind.vcs.commit.files", "Files staged per commit");
}

/// Record how a dispatched event ended.
pub fn record_event(action: Action, result: EventResult, duration: std::time::Duration) {
    let result_str = match result {
        EventResult::Applied => "applied",
        EventResult::Rejected => "rejected",
        EventResult::Failed => "failed",
    };

    counter!("autobind.event.count", "action" => action.as_str(), "result" => result_str)
        .increment(1);
    histogram!("autobind.event.duration.seconds", "action" => action.as_str())
        .record(duration.as_secs_f64());
}

/// Outcome of one dispatched event.
#[derive(Debug, Clone, Copy)]
pub enum EventResult {
    /// Both zones were updated (or already up to date).
    Applied,
    /// The key was malformed and the event dropped.
    Rejected,
    /// A fatal error stopped processing.
    Failed,
}

/// Record a single zone file update.
pub fn record_zone_update(kind: ZoneKind, action: Action, result: ApplyResult) {
    let result_str = match result {
        ApplyResult::Created => "created",
        ApplyResult::Appended => "appended",
        ApplyResult::Replaced => "replaced",
        ApplyResult::Duplicate => "duplicate",
        ApplyResult::Deleted => "deleted",
    };

    counter!(
        "autobind.zone.update.count",
        "zone" => kind.as_str(),
        "action" => action.as_str(),
        "result" => result_str
    )
    .increment(1);
}

/// What happened to a zone file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// Zone file created with its header and the first record.
    Created,
    /// Record line appended.
    Appended,
    /// Existing line for the key rewritten with a new value.
    Replaced,
    /// Identical line already present.
    Duplicate,
    /// Record line removed.
    Deleted,
}

/// Record a nameserver reload attempt.
pub fn record_reload(success: bool, coalesced: usize) {
    let result = if success { "success" } else { "error" };
    counter!("autobind.reload.count", "result" => result).increment(1);
    histogram!("autobind.reload.coalesced_requests").record(coalesced as f64);
}

/// Record a watch reconnect.
pub fn record_watch_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::Error => "error",
        ReconnectReason::IndexCleared => "index_cleared",
    };

    counter!("autobind.watch.reconnect.count", "reason" => reason_str).increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectReason {
    /// Transport or HTTP error talking to etcd.
    Error,
    /// The wait index fell out of etcd's event history.
    IndexCleared,
}

/// Record a benign watch timeout.
pub fn record_watch_timeout() {
    counter!("autobind.watch.timeout.count").increment(1);
}

/// Record the current depth of the event queue.
pub fn record_queue_depth(depth: usize) {
    gauge!("autobind.queue.depth").set(depth as f64);
}

/// Record a version tracker commit.
pub fn record_commit(files: usize) {
    counter!("autobind.vcs.commit.count").increment(1);
    histogram!("autobind.vcs.commit.files").record(files as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
