//! Error types for etcd-autobind.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the agent.
///
/// Everything in here is fatal: the dispatcher hands it back to the agent,
/// which releases the pid file and exits so a supervisor can restart it.
/// Recoverable conditions (malformed keys, duplicate records) never become
/// a `SyncError`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error while touching zone files, fragments or the pid file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A delete referenced a record that is not present in its zone file.
    #[error("record {key} ({token}) not found in {}", file.display())]
    NotFound {
        /// Zone file that was searched.
        file: PathBuf,
        /// Line key (short hostname label or last octet).
        key: String,
        /// Trailing token the line was expected to carry.
        token: String,
    },

    /// `named-checkconf` (or the configured check command) rejected the configuration.
    #[error("nameserver configuration check failed: {0}")]
    ConfigValidation(String),

    /// The nameserver reload command failed.
    #[error("nameserver reload failed: {0}")]
    Reload(String),

    /// The etcd watch returned something we could not use.
    #[error("watch error: {0}")]
    Watch(String),

    /// HTTP client error talking to etcd.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Malformed JSON from etcd.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Committing the zone directory failed.
    #[error("version control error: {0}")]
    VersionControl(String),

    /// Another instance holds the pid file.
    #[error("another instance is running (pid file {} exists)", .0.display())]
    AlreadyRunning(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A background task panicked.
    #[error("{0} task panicked: {1}")]
    TaskPanicked(&'static str, String),

    /// A queue between tasks was closed while its peer was still running.
    #[error("{0} queue closed")]
    QueueClosed(&'static str),
}
