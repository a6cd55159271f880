//! Test doubles for dependency injection
//!
//! Provides in-memory implementations of all external dependencies for isolated testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::traits::{
    ChangeStream, FileWatcher, FileWatcherError, StreamPoll,
    HostControl, PickerObserver,
    LaunchError, ProcessLauncher,
};

// ============================================================================
// ManualFileWatcher
// ============================================================================

struct OpenStream {
    id: usize,
    tx: Sender<StreamPoll>,
}

/// Manual file watcher for testing
///
/// Does not actually watch the file system. Tests push notification buffers
/// into the open streams by hand.
#[derive(Clone, Default)]
pub struct ManualFileWatcher {
    streams: Arc<Mutex<HashMap<PathBuf, OpenStream>>>,
    opens: Arc<AtomicUsize>,
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `open` was called
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Whether a stream for this directory is currently held open
    pub fn is_open(&self, directory: &Path) -> bool {
        self.streams.lock().unwrap().contains_key(&key(directory))
    }

    /// Deliver one buffer containing a record per name, in order
    pub fn simulate_names(&self, directory: &Path, names: &[&str]) {
        let dir = key(directory);
        let paths = names.iter().map(|name| dir.join(name)).collect();
        self.send(&dir, StreamPoll::Batch(paths));
    }

    /// Make the next blocking read fail
    pub fn simulate_failure(&self, directory: &Path, reason: &str) {
        self.send(&key(directory), StreamPoll::Failed(reason.to_string()));
    }

    fn send(&self, directory: &Path, poll: StreamPoll) {
        if let Some(stream) = self.streams.lock().unwrap().get(directory) {
            let _ = stream.tx.send(poll);
        }
    }
}

fn key(directory: &Path) -> PathBuf {
    std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf())
}

impl FileWatcher for ManualFileWatcher {
    fn open(&self, directory: &Path) -> Result<Box<dyn ChangeStream>, FileWatcherError> {
        let id = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel();
        let dir = key(directory);
        self.streams.lock().unwrap().insert(dir.clone(), OpenStream { id, tx });
        Ok(Box::new(ManualStream {
            id,
            directory: dir,
            rx,
            streams: Arc::clone(&self.streams),
        }))
    }
}

struct ManualStream {
    id: usize,
    directory: PathBuf,
    rx: Receiver<StreamPoll>,
    streams: Arc<Mutex<HashMap<PathBuf, OpenStream>>>,
}

impl ChangeStream for ManualStream {
    fn next_batch(&mut self, timeout: Duration) -> StreamPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(poll) => poll,
            Err(RecvTimeoutError::Timeout) => StreamPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => StreamPoll::Closed,
        }
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        let mut streams = self.streams.lock().unwrap();
        if streams.get(&self.directory).map(|s| s.id) == Some(self.id) {
            streams.remove(&self.directory);
        }
    }
}

// ============================================================================
// RecordedLauncher
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Recorded process launcher for testing
///
/// Records every launch; optionally fails all of them.
#[derive(Clone, Default)]
pub struct RecordedLauncher {
    launches: Arc<Mutex<Vec<LaunchRecord>>>,
    failure: Arc<Mutex<Option<LaunchError>>>,
}

impl RecordedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always fail with given error
    pub fn always_fail(error: LaunchError) -> Self {
        let launcher = Self::new();
        *launcher.failure.lock().unwrap() = Some(error);
        launcher
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<LaunchRecord> {
        self.launches.lock().unwrap().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

impl ProcessLauncher for RecordedLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<(), LaunchError> {
        self.launches.lock().unwrap().push(LaunchRecord {
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// RecordedHostControl / RecordingObserver
// ============================================================================

/// Counts exit requests instead of exiting
#[derive(Clone, Default)]
pub struct RecordedHostControl {
    exits: Arc<AtomicUsize>,
}

impl RecordedHostControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_count(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

impl HostControl for RecordedHostControl {
    fn request_exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every picker-active transition
#[derive(Clone, Default)]
pub struct RecordingObserver {
    transitions: Arc<Mutex<Vec<bool>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().unwrap().clone()
    }
}

impl PickerObserver for RecordingObserver {
    fn on_picker_active_changed(&self, active: bool) {
        self.transitions.lock().unwrap().push(active);
    }
}

// ============================================================================
// Tests
// ============================================================================
