//! etcd-autobind - keeps BIND zone files in sync with host records in etcd.
//!
//! Host records live in etcd as keys of the form
//! `/dns/<domain>/<hostname>/<ip>`. The agent long-polls the prefix and,
//! for every change, edits the forward zone of `<domain>` and the reverse
//! zone of the host's /24, creating zone files, conf fragments and
//! `include` lines on first use. Bursts of edits are folded into a single
//! nameserver reload.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          etcd-autobind                           │
//! │                                                                  │
//! │  ┌──────────────┐  events   ┌──────────────┐   edits            │
//! │  │ EtcdWatcher  │──────────▶│  Dispatcher  │──────────▶ zone    │
//! │  │ (long poll)  │  (mpsc)   │ (one at a    │            files   │
//! │  └──────────────┘           │  time)       │──────────▶ git     │
//! │                             └──────┬───────┘   commit           │
//! │                                    │ reload request             │
//! │                                    ▼                            │
//! │                             ┌──────────────┐                    │
//! │                             │ ReloadSched. │──▶ named-checkconf │
//! │                             │ (debounced)  │──▶ reload named    │
//! │                             └──────────────┘                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use etcd_autobind::{Config, SyncAgent};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), etcd_autobind::SyncError> {
//!     let config = Config::default();
//!     let shutdown = CancellationToken::new();
//!
//!     SyncAgent::from_config(&config)?.run(shutdown).await
//! }
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod pidfile;
pub mod record;
pub mod reload;
pub mod sync;
pub mod telemetry;
pub mod vcs;
pub mod watch;
pub mod zonefile;

// Re-export main types
pub use agent::SyncAgent;
pub use config::{Config, EtcdConfig, NamedConfig, SyncConfig, TelemetryConfig};
pub use error::SyncError;
pub use record::{Action, ChangeEvent, Record};
pub use sync::{Synchronizer, TouchedFiles};
