//! Process singleton marker.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Holds the pid file for the lifetime of the agent.
///
/// The file is removed on [`PidFile::release`] or when the guard is dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    released: bool,
}

impl PidFile {
    /// Create `path` containing the current process id.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] if the file already exists,
    /// stale or not; an operator has to remove a stale one.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SyncError::AlreadyRunning(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), pid = std::process::id(), "pid file written");

        Ok(Self {
            path,
            released: false,
        })
    }

    /// Path of the marker.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        std::fs::remove_file(&self.path)
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}
