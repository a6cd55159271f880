//! notify-backed change streams

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};

use crate::traits::{ChangeStream, FileWatcher, FileWatcherError, StreamPoll};

/// Opens one debounced recursive `notify` watcher per directory.
///
/// The debounce window is kept short: the console helper rewrites its
/// heartbeat at ~60 Hz and every write would otherwise reach the host.
pub struct NotifyFileWatcher {
    debounce: Duration,
}

impl NotifyFileWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for NotifyFileWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl FileWatcher for NotifyFileWatcher {
    fn open(&self, directory: &Path) -> Result<Box<dyn ChangeStream>, FileWatcherError> {
        if !directory.exists() {
            return Err(FileWatcherError::PathNotFound(directory.to_path_buf()));
        }

        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(self.debounce, None, tx)
            .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;

        debouncer
            .watch(directory, RecursiveMode::Recursive)
            .map_err(|e| match e.kind {
                notify::ErrorKind::PathNotFound => FileWatcherError::PathNotFound(directory.to_path_buf()),
                notify::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                    FileWatcherError::PermissionDenied(directory.to_path_buf())
                }
                _ => FileWatcherError::WatchError(e.to_string()),
            })?;

        tracing::info!(directory = %directory.display(), "Opened OS watch handle");

        Ok(Box::new(NotifyStream {
            _debouncer: debouncer,
            rx,
        }))
    }
}

/// Holds the debouncer (and with it the OS handle) for as long as the stream lives
struct NotifyStream<D> {
    _debouncer: D,
    rx: Receiver<DebounceEventResult>,
}

impl<D: Send> ChangeStream for NotifyStream<D> {
    fn next_batch(&mut self, timeout: Duration) -> StreamPoll {
        to_poll(self.rx.recv_timeout(timeout))
    }
}

/// Debouncer errors (queue overflow, a vanished subpath) don't end the
/// stream; only losing the debouncer's channel does.
fn to_poll(received: Result<DebounceEventResult, RecvTimeoutError>) -> StreamPoll {
    match received {
        Ok(Ok(events)) => {
            let paths = events
                .into_iter()
                .flat_map(|event| event.event.paths)
                .collect();
            StreamPoll::Batch(paths)
        }
        Ok(Err(errors)) => {
            for error in errors {
                tracing::error!(error = %error, "Watch error");
            }
            StreamPoll::Idle
        }
        Err(RecvTimeoutError::Timeout) => StreamPoll::Idle,
        Err(RecvTimeoutError::Disconnected) => {
            StreamPoll::Failed("debouncer event channel disconnected".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{EventKind, ModifyKind};
    use notify_debouncer_full::DebouncedEvent;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_events_flatten_to_paths_in_order() {
        let event = |path: &str| {
            DebouncedEvent::new(
                notify::Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from(path)),
                Instant::now(),
            )
        };

        let poll = to_poll(Ok(Ok(vec![event("/s/console.heartbeat"), event("/s/selectedFile.txt")])));

        assert_eq!(
            poll,
            StreamPoll::Batch(vec![
                PathBuf::from("/s/console.heartbeat"),
                PathBuf::from("/s/selectedFile.txt"),
            ])
        );
    }

    #[test]
    fn test_debouncer_errors_keep_stream_alive() {
        let poll = to_poll(Ok(Err(vec![notify::Error::generic("inotify queue overflow")])));

        assert_eq!(poll, StreamPoll::Idle);
    }

    #[test]
    fn test_disconnect_fails_stream() {
        assert_eq!(to_poll(Err(RecvTimeoutError::Timeout)), StreamPoll::Idle);
        assert!(matches!(
            to_poll(Err(RecvTimeoutError::Disconnected)),
            StreamPoll::Failed(_)
        ));
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");

        let result = NotifyFileWatcher::default().open(&missing);

        assert!(matches!(result, Err(FileWatcherError::PathNotFound(p)) if p == missing));
    }

    #[test]
    fn test_open_reports_writes() {
        let dir = TempDir::new().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let mut stream = NotifyFileWatcher::default().open(&root).unwrap();

        std::fs::write(root.join("selectedFile.txt"), "-1").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline && !seen.contains(&root.join("selectedFile.txt")) {
            if let StreamPoll::Batch(paths) = stream.next_batch(Duration::from_millis(100)) {
                seen.extend(paths);
            }
        }
        assert!(seen.contains(&root.join("selectedFile.txt")));
    }
}
