//! Commits touched zone files to the git repository in the zone directory.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::metrics;
use crate::sync::TouchedFiles;

/// Records zone file changes after each processed event.
#[async_trait]
pub trait VersionTracker: Send + Sync {
    /// Stage and commit `files`. Does nothing when `files` is empty.
    async fn record(&self, files: &TouchedFiles, message: &str) -> Result<(), SyncError>;
}

/// Tracker used when commits are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

#[async_trait]
impl VersionTracker for NoopTracker {
    async fn record(&self, _files: &TouchedFiles, _message: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Tracker that shells out to `git` inside a work tree.
#[derive(Debug, Clone)]
pub struct GitTracker {
    work_tree: PathBuf,
}

impl GitTracker {
    /// Track changes in the repository rooted at `work_tree`.
    pub fn new(work_tree: impl Into<PathBuf>) -> Self {
        Self {
            work_tree: work_tree.into(),
        }
    }

    fn git(&self) -> Command {
        let mut command = Command::new("git");
        command.arg("-C").arg(&self.work_tree);
        command
    }

    async fn run(
        &self,
        command: &mut Command,
        what: &str,
    ) -> Result<std::process::Output, SyncError> {
        command
            .output()
            .await
            .map_err(|e| SyncError::VersionControl(format!("failed to run git {what}: {e}")))
    }
}

#[async_trait]
impl VersionTracker for GitTracker {
    async fn record(&self, files: &TouchedFiles, message: &str) -> Result<(), SyncError> {
        if files.is_empty() {
            return Ok(());
        }

        let mut add = self.git();
        add.arg("add").arg("--").args(files.paths());
        let output = self.run(&mut add, "add").await?;
        if !output.status.success() {
            return Err(SyncError::VersionControl(format!(
                "git add failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // Exit status 0 means nothing is staged (e.g. a duplicate upsert).
        let mut diff = self.git();
        diff.args(["diff", "--cached", "--quiet"]);
        if self.run(&mut diff, "diff").await?.status.success() {
            debug!("no staged changes, skipping commit");
            return Ok(());
        }

        let mut commit = self.git();
        commit.args(["commit", "--quiet", "-m", message]);
        let output = self.run(&mut commit, "commit").await?;
        if !output.status.success() {
            return Err(SyncError::VersionControl(format!(
                "git commit failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        metrics::record_commit(files.len());
        info!(files = files.len(), %message, "zone changes committed");
        Ok(())
    }
}

/// Commit message for changes made now, e.g. "2024-05-01 13:37:00".
pub fn commit_message() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git").arg("--version").output().is_ok()
    }

    fn init_repo(dir: &TempDir) {
        for args in [
            &["init", "--quiet"][..],
            &["config", "user.name", "autobind"][..],
            &["config", "user.email", "autobind@localhost"][..],
        ] {
            let status = StdCommand::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .unwrap();
            assert!(status.success());
        }
    }

    fn commit_count(dir: &TempDir) -> usize {
        let output = StdCommand::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["rev-list", "--count", "HEAD"])
            .output()
            .unwrap();
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().unwrap()
    }

    #[test]
    fn test_commit_message_format() {
        let message = commit_message();
        assert!(chrono::NaiveDateTime::parse_from_str(&message, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_empty_set_is_noop() {
        let tracker = GitTracker::new("/nonexistent/repo");
        tracker.record(&TouchedFiles::new(), "msg").await.unwrap();
    }

    #[tokio::test]
    async fn test_git_commits_only_real_changes() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(&dir);
        let zone = dir.path().join("example.com.zone");
        fs::write(&zone, "a IN A 10.0.0.1\n").unwrap();

        let mut touched = TouchedFiles::new();
        touched.insert("example.com", &zone);
        let tracker = GitTracker::new(dir.path());

        tracker.record(&touched, "first").await.unwrap();
        assert_eq!(commit_count(&dir), 1);

        // Unchanged file: nothing to commit, not an error.
        tracker.record(&touched, "second").await.unwrap();
        assert_eq!(commit_count(&dir), 1);

        fs::write(&zone, "a IN A 10.0.0.2\n").unwrap();
        tracker.record(&touched, "third").await.unwrap();
        assert_eq!(commit_count(&dir), 2);
    }

    #[tokio::test]
    async fn test_git_outside_repository_fails() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let zone = dir.path().join("example.com.zone");
        fs::write(&zone, "a IN A 10.0.0.1\n").unwrap();
        let mut touched = TouchedFiles::new();
        touched.insert("example.com", &zone);

        let err = GitTracker::new(dir.path())
            .record(&touched, "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::VersionControl(_)));
    }
}
