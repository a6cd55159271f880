//! Detached helper launcher

use std::path::Path;
use std::process::{Command, Stdio};

use crate::traits::{LaunchError, ProcessLauncher};

/// Spawns helpers with null stdio and never blocks the caller.
///
/// The child is reaped on a throwaway thread so it does not linger as a
/// zombie for the lifetime of the host.
#[derive(Debug, Default)]
pub struct DetachedLauncher;

impl DetachedLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for DetachedLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<(), LaunchError> {
        if !program.exists() {
            return Err(LaunchError::NotFound(program.to_path_buf()));
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;

        let pid = child.id();
        tracing::info!(program = %program.display(), pid, "Launched helper");

        let program = program.to_path_buf();
        std::thread::Builder::new()
            .name("helper-reaper".into())
            .spawn(move || match child.wait() {
                Ok(status) => tracing::debug!(program = %program.display(), %status, "Helper exited"),
                Err(e) => tracing::warn!(program = %program.display(), error = %e, "Failed to wait on helper"),
            })
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;

        Ok(())
    }
}
