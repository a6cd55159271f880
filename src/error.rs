//! Setup failures for the console and picker subsystems.
//!
//! Any of these disables the affected subsystem for the session; none of them
//! is fatal to the host.

use std::path::PathBuf;
use thiserror::Error;

use crate::scripts::ScriptError;
use crate::traits::{FileWatcherError, LaunchError};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to prepare shared directory {path}: {source}")]
    SharedDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Watch(#[from] FileWatcherError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl SetupError {
    pub fn shared_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SetupError::SharedDir { path: path.into(), source }
    }
}
