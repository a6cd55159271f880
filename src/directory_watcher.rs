//! Per-directory change dispatch into the host context
//!
//! [`WatcherRegistry`] holds at most one [`DirectoryWatcher`] per path. Each
//! watcher owns a background thread that blocks on the OS change stream,
//! decodes every record of every buffer into a file name relative to the
//! directory, and queues the matching callback onto the [`MainQueue`].
//! Callbacks never run on the watcher thread.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::main_queue::MainQueue;
use crate::traits::{ChangeStream, FileWatcher, FileWatcherError, StreamPoll, WatchCallback};

/// How long the worker blocks before re-checking its cancel flag
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

type CallbackMap = Arc<Mutex<HashMap<String, WatchCallback>>>;

/// Keyed registry of directory watchers, one per distinct path
pub struct WatcherRegistry {
    backend: Arc<dyn FileWatcher>,
    main_queue: MainQueue,
    watchers: Mutex<HashMap<PathBuf, Arc<DirectoryWatcher>>>,
}

impl WatcherRegistry {
    pub fn new(backend: Arc<dyn FileWatcher>, main_queue: MainQueue) -> Self {
        Self {
            backend,
            main_queue,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the watcher for `directory`, opening the OS handle and starting
    /// its thread on first use.
    pub fn get_for_directory(&self, directory: &Path) -> Result<Arc<DirectoryWatcher>, FileWatcherError> {
        let key = registry_key(directory);
        let mut watchers = self.watchers.lock().unwrap();

        if let Some(existing) = watchers.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let stream = self.backend.open(&key)?;
        let watcher = Arc::new(DirectoryWatcher::spawn(key.clone(), stream, self.main_queue.clone())?);
        watchers.insert(key, Arc::clone(&watcher));
        Ok(watcher)
    }

    /// Tear down the watcher for `directory`: cancel its thread, wait for it,
    /// and release the OS handle. Returns false if nothing was registered.
    pub fn remove_directory(&self, directory: &Path) -> bool {
        let removed = self.watchers.lock().unwrap().remove(&registry_key(directory));
        match removed {
            Some(watcher) => {
                watcher.stop();
                tracing::info!(directory = %watcher.directory().display(), "Directory watcher removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.watchers.lock().unwrap().contains_key(&registry_key(directory))
    }

    pub fn len(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registered directory
    pub fn clear(&self) {
        let drained: Vec<_> = self.watchers.lock().unwrap().drain().collect();
        for (_, watcher) in drained {
            watcher.stop();
        }
    }
}

impl Drop for WatcherRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

fn registry_key(directory: &Path) -> PathBuf {
    std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf())
}

/// One watched directory and its file-name callbacks
pub struct DirectoryWatcher {
    directory: PathBuf,
    callbacks: CallbackMap,
    cancel: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    fn spawn(
        directory: PathBuf,
        stream: Box<dyn ChangeStream>,
        main_queue: MainQueue,
    ) -> Result<Self, FileWatcherError> {
        let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let directory = directory.clone();
            let callbacks = Arc::clone(&callbacks);
            let cancel = Arc::clone(&cancel);
            std::thread::Builder::new()
                .name(format!("watch:{}", directory.display()))
                .spawn(move || run_worker(directory, stream, callbacks, main_queue, cancel))
                .map_err(|e| FileWatcherError::WatchError(e.to_string()))?
        };

        tracing::info!(directory = %directory.display(), "Directory watcher started");

        Ok(Self {
            directory,
            callbacks,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Register interest in one file name (relative to the directory).
    /// Only the last registration for a name is kept.
    pub fn watch(&self, name: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) {
        let name = name.into();
        tracing::debug!(directory = %self.directory.display(), name = %name, "Watching file");
        self.callbacks.lock().unwrap().insert(name, Arc::new(callback));
    }

    pub fn unwatch(&self, name: &str) -> bool {
        self.callbacks.lock().unwrap().remove(name).is_some()
    }

    pub fn watched_names(&self) -> Vec<String> {
        self.callbacks.lock().unwrap().keys().cloned().collect()
    }

    /// Whether the background thread is still alive
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the worker and wait for it. Idempotent.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(directory = %self.directory.display(), "Watcher thread panicked");
            }
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    directory: PathBuf,
    mut stream: Box<dyn ChangeStream>,
    callbacks: CallbackMap,
    main_queue: MainQueue,
    cancel: Arc<AtomicBool>,
) {
    while !cancel.load(Ordering::SeqCst) {
        match stream.next_batch(POLL_TIMEOUT) {
            StreamPoll::Batch(paths) => dispatch_batch(&directory, &paths, &callbacks, &main_queue),
            StreamPoll::Idle => {}
            StreamPoll::Failed(reason) => {
                // No retry: the directory is dead for this session
                tracing::error!(directory = %directory.display(), reason = %reason, "Failed to read directory changes");
                return;
            }
            StreamPoll::Closed => {
                tracing::debug!(directory = %directory.display(), "Change stream closed");
                return;
            }
        }
    }
    tracing::debug!(directory = %directory.display(), "Directory watcher cancelled");
}

/// Queue one host-context task per record whose name has a callback.
///
/// Records are handled in buffer order. The callback is looked up again when
/// the task runs, so a later `watch` for the same name takes effect and an
/// `unwatch` suppresses delivery.
fn dispatch_batch(directory: &Path, paths: &[PathBuf], callbacks: &CallbackMap, main_queue: &MainQueue) {
    for path in paths {
        let Some(name) = decode_name(directory, path) else {
            continue;
        };

        if !callbacks.lock().unwrap().contains_key(&name) {
            continue;
        }

        tracing::trace!(name = %name, "Dispatching file change");
        let callbacks = Arc::clone(callbacks);
        main_queue.queue(move || {
            let callback = callbacks.lock().unwrap().get(&name).cloned();
            if let Some(callback) = callback {
                callback();
            }
        });
    }
}

/// File name of `path` relative to `directory`, `/`-separated.
fn decode_name(directory: &Path, path: &Path) -> Option<String> {
    let relative = match path.strip_prefix(directory) {
        Ok(relative) => relative,
        Err(_) => return path.file_name().map(|n| n.to_string_lossy().into_owned()),
    };

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
