//! Shared test infrastructure for agent integration tests.

#![allow(dead_code)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use etcd_autobind::config::SyncConfig;
use etcd_autobind::reload::Nameserver;
use etcd_autobind::vcs::NoopTracker;
use etcd_autobind::watch::{EventSource, WatchOutcome};
use etcd_autobind::{Action, ChangeEvent, SyncAgent, SyncError};

// --- Constants ---

pub const DOMAIN: &str = "ops.example.com";
pub const DEBOUNCE: Duration = Duration::from_secs(5);

/// Key for `host` at `ip` under [`DOMAIN`].
pub fn host_key(host: &str, ip: &str) -> String {
    format!("/dns/{DOMAIN}/{host}.{DOMAIN}/{ip}")
}

// --- ChannelSource ---

/// Event source fed by the test through a channel.
///
/// Once the sender is dropped the source parks forever, like an etcd watch
/// on a quiet prefix.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<WatchOutcome, SyncError> {
        match self.rx.recv().await {
            Some(event) => Ok(WatchOutcome::Event(event)),
            None => std::future::pending().await,
        }
    }
}

/// Handle for pushing events into a [`ChannelSource`].
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl EventFeed {
    pub fn upsert(&self, key: impl Into<String>) {
        self.tx.send(ChangeEvent::new(key, Action::Upsert)).unwrap();
    }

    pub fn delete(&self, key: impl Into<String>) {
        self.tx.send(ChangeEvent::new(key, Action::Delete)).unwrap();
    }
}

pub fn channel_source() -> (ChannelSource, EventFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSource { rx }, EventFeed { tx })
}

// --- CountingNameserver ---

/// Nameserver that only counts reloads.
#[derive(Clone)]
pub struct CountingNameserver {
    reloads: Arc<watch::Sender<usize>>,
}

impl CountingNameserver {
    pub fn new() -> (Self, watch::Receiver<usize>) {
        let (tx, rx) = watch::channel(0);
        (
            Self {
                reloads: Arc::new(tx),
            },
            rx,
        )
    }
}

#[async_trait]
impl Nameserver for CountingNameserver {
    async fn validate_config(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn reload(&self) -> Result<(), SyncError> {
        self.reloads.send_modify(|n| *n += 1);
        Ok(())
    }
}

// --- Harness ---

/// A scratch nameserver layout with an empty `named.conf`.
pub struct Harness {
    pub dir: TempDir,
    pub config: SyncConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = SyncConfig::rooted_at(dir.path());
        config.debounce_secs = DEBOUNCE.as_secs();
        fs::write(&config.main_conf, "// managed by etcd-autobind tests\n").unwrap();
        Self { dir, config }
    }

    pub fn agent(
        &self,
        source: ChannelSource,
        nameserver: CountingNameserver,
    ) -> SyncAgent<ChannelSource, CountingNameserver> {
        SyncAgent::new(
            Arc::new(self.config.clone()),
            source,
            nameserver,
            Arc::new(NoopTracker),
        )
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative))
            .unwrap_or_else(|e| panic!("reading {relative}: {e}"))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.dir.path().join(relative).exists()
    }

    pub fn main_conf(&self) -> String {
        fs::read_to_string(&self.config.main_conf).unwrap()
    }
}
