//! Process launcher trait for starting helper scripts outside the sandbox

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    #[error("Helper not found: {0}")]
    NotFound(PathBuf),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
}

/// Trait for launching a helper process detached from the host
///
/// Production: `std::process::Command` with null stdio
/// Testing: Recorded launches
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLauncher: Send + Sync {
    /// Start `program` with positional `args`. Must not wait for it to exit.
    fn launch(&self, program: &Path, args: &[String]) -> Result<(), LaunchError>;
}
