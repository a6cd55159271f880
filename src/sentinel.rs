//! The shared directory and its well-known files

use std::path::{Path, PathBuf};
use std::sync::Once;

/// Result sentinel written by the picker helper
pub const SELECTED_FILE: &str = "selectedFile.txt";
/// Append-only log stream tailed by the console helper
pub const CONSOLE_ANSI: &str = "console.ansi";
/// Epoch-millis liveness file rewritten by the console helper
pub const CONSOLE_HEARTBEAT: &str = "console.heartbeat";
/// Presence tells the console helper to shut down
pub const CONSOLE_EXIT: &str = "console.exit";

/// Content of [`SELECTED_FILE`] when the user cancelled
pub const CANCELLED: &str = "-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDir {
    root: PathBuf,
}

impl SharedDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn selected_file(&self) -> PathBuf {
        self.root.join(SELECTED_FILE)
    }

    pub fn console_ansi(&self) -> PathBuf {
        self.root.join(CONSOLE_ANSI)
    }

    pub fn console_heartbeat(&self) -> PathBuf {
        self.root.join(CONSOLE_HEARTBEAT)
    }

    pub fn console_exit(&self) -> PathBuf {
        self.root.join(CONSOLE_EXIT)
    }

    /// Tell the console helper to shut down
    pub fn write_exit_sentinel(&self) -> std::io::Result<()> {
        std::fs::write(self.console_exit(), "")
    }

    /// Remove a leftover exit sentinel from a previous session
    pub fn clear_exit_sentinel(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(self.console_exit()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

static PANIC_HOOK: Once = Once::new();

/// Write the exit sentinel on any panic, then hand over to whichever hook was
/// installed before. Installing more than once is a no-op.
pub fn install_panic_hook(shared: SharedDir) {
    PANIC_HOOK.call_once(move || {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Err(e) = shared.write_exit_sentinel() {
                tracing::error!(error = %e, "Failed to create console exit file");
            }
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_layout() {
        let shared = SharedDir::new("/tmp/bridge");
        assert_eq!(shared.selected_file(), PathBuf::from("/tmp/bridge/selectedFile.txt"));
        assert_eq!(shared.console_ansi(), PathBuf::from("/tmp/bridge/console.ansi"));
        assert_eq!(shared.console_heartbeat(), PathBuf::from("/tmp/bridge/console.heartbeat"));
        assert_eq!(shared.console_exit(), PathBuf::from("/tmp/bridge/console.exit"));
    }

    #[test]
    fn test_exit_sentinel_lifecycle() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::new(dir.path().join("nested"));
        shared.create().unwrap();

        assert!(!shared.clear_exit_sentinel().unwrap());
        shared.write_exit_sentinel().unwrap();
        assert!(shared.console_exit().exists());
        assert!(shared.clear_exit_sentinel().unwrap());
        assert!(!shared.console_exit().exists());
    }

    #[test]
    fn test_panic_hook_writes_exit_sentinel() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::new(dir.path());
        install_panic_hook(shared.clone());

        let result = std::panic::catch_unwind(|| panic!("boom"));

        assert!(result.is_err());
        assert!(shared.console_exit().exists());
    }
}
