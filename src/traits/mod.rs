//! Trait definitions for dependency injection
//!
//! Everything outside the host process (OS change notification, helper
//! processes, the host's own shutdown path, the picker popup) sits behind a
//! trait so the coordination logic can be driven by tests.

use std::sync::Arc;

mod file_watcher;
mod host_control;
mod process_launcher;

pub use file_watcher::{ChangeStream, FileWatcher, FileWatcherError, StreamPoll};
pub use host_control::{HostControl, PickerObserver};
pub use process_launcher::{LaunchError, ProcessLauncher};

#[cfg(test)]
pub use file_watcher::MockFileWatcher;
#[cfg(test)]
pub use host_control::{MockHostControl, MockPickerObserver};
#[cfg(test)]
pub use process_launcher::MockProcessLauncher;

/// Callback registered for a watched file name; always invoked on the host context
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;
