//! File watching trait for OS-level directory change notification

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileWatcherError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Watch error: {0}")]
    WatchError(String),
}

/// One poll of a change stream.
///
/// A `Batch` is the decoded form of one OS notification buffer: every
/// changed path it carried, in the order the OS returned them.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPoll {
    Batch(Vec<PathBuf>),
    Idle,
    Failed(String),
    Closed,
}

/// An open OS watch handle on one directory.
///
/// Dropping the stream releases the handle.
pub trait ChangeStream: Send {
    /// Block for at most `timeout` waiting for the next notification buffer
    fn next_batch(&mut self, timeout: Duration) -> StreamPoll;
}

/// Trait for file system watching
///
/// Production: inotify/FSEvents via `notify` crate
/// Testing: Manual batch emission
#[cfg_attr(test, mockall::automock)]
pub trait FileWatcher: Send + Sync {
    /// Open a recursive change stream for a directory
    fn open(&self, directory: &Path) -> Result<Box<dyn ChangeStream>, FileWatcherError>;
}
