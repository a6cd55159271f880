//! Production implementations of traits

mod file_watcher;
mod host_control;
mod process_launcher;

pub use file_watcher::NotifyFileWatcher;
pub use host_control::ExitFlag;
pub use process_launcher::DetachedLauncher;
