//! File/folder picks proxied through the picker helper
//!
//! A pick launches `openPicker.sh` detached and parks one
//! [`PendingPickRequest`]. The helper writes `selectedFile.txt`; the directory
//! watcher brings that change onto the host context, where the file content is
//! parsed and the request's callback fires exactly once.
//!
//! The picker-active flag and the pending-request slot only change together,
//! under the `pending` lock. Readers that don't need the slot can check the
//! flag lock-free.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::directory_watcher::WatcherRegistry;
use crate::error::SetupError;
use crate::paths::PathTranslator;
use crate::scripts::{self, PICKER_SCRIPT};
use crate::sentinel::{SharedDir, CANCELLED, SELECTED_FILE};
use crate::traits::{LaunchError, PickerObserver, ProcessLauncher};

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("A file picker is already open")]
    AlreadyOpen,
    #[error("Failed to launch picker: {0}")]
    Launch(#[from] LaunchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickMode {
    OpenFile,
    SaveFile,
    OpenFolder,
    OpenMultipleFiles,
    BrowseFiles,
}

impl PickMode {
    pub fn title(&self) -> &'static str {
        match self {
            PickMode::OpenFile => "Select a file",
            PickMode::SaveFile => "Save...",
            PickMode::OpenFolder => "Select a folder",
            PickMode::OpenMultipleFiles => "Select files",
            PickMode::BrowseFiles => "Browse",
        }
    }

    /// Mode argument understood by the helper script
    pub fn token(&self) -> &'static str {
        match self {
            PickMode::OpenFile => "single",
            PickMode::SaveFile => "save",
            PickMode::OpenFolder => "dir",
            PickMode::OpenMultipleFiles => "multi",
            PickMode::BrowseFiles => "browse",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        [
            PickMode::OpenFile,
            PickMode::SaveFile,
            PickMode::OpenFolder,
            PickMode::OpenMultipleFiles,
            PickMode::BrowseFiles,
        ]
        .into_iter()
        .find(|mode| mode.token() == token)
    }

    pub fn expects_multiple(&self) -> bool {
        matches!(self, PickMode::OpenMultipleFiles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter {
    pub description: String,
    pub files: Vec<String>,
}

impl FileFilter {
    pub fn new(description: impl Into<String>, files: &[&str]) -> Self {
        Self {
            description: description.into(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// `description|ext1 ext2`
    pub fn render(&self) -> String {
        format!("{}|{}", self.description, self.files.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    /// In the host's path convention
    pub start_path: String,
    pub mode: PickMode,
    pub filters: Vec<FileFilter>,
}

impl PickRequest {
    pub fn new(start_path: impl Into<String>, mode: PickMode) -> Self {
        Self {
            start_path: start_path.into(),
            mode,
            filters: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<FileFilter>) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickResult {
    Single(PathBuf),
    Multiple(Vec<PathBuf>),
    Cancelled,
}

/// Interpret `selectedFile.txt` for a request of `mode`.
///
/// `-1` and blank content both mean the user cancelled.
pub fn parse_result(content: &str, mode: PickMode) -> PickResult {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed == CANCELLED {
        return PickResult::Cancelled;
    }

    if mode.expects_multiple() {
        let paths: Vec<PathBuf> = trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect();
        PickResult::Multiple(paths)
    } else {
        PickResult::Single(PathBuf::from(trimmed))
    }
}

pub type PickCallback = Box<dyn FnOnce(PickResult) + Send>;

struct PendingPickRequest {
    id: Uuid,
    mode: PickMode,
    callback: PickCallback,
    created_at: DateTime<Utc>,
}

/// Flag and slot as seen together under the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickerSnapshot {
    pub active: bool,
    pub pending: Option<Uuid>,
}

pub struct PickerBridge {
    shared: SharedDir,
    script: PathBuf,
    translator: PathTranslator,
    launcher: Arc<dyn ProcessLauncher>,
    observer: Option<Arc<dyn PickerObserver>>,
    active: AtomicBool,
    pending: Mutex<Option<PendingPickRequest>>,
}

impl PickerBridge {
    pub fn new(
        shared: SharedDir,
        translator: PathTranslator,
        launcher: Arc<dyn ProcessLauncher>,
        observer: Option<Arc<dyn PickerObserver>>,
    ) -> Self {
        Self {
            script: shared.root().join(PICKER_SCRIPT),
            shared,
            translator,
            launcher,
            observer,
            active: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    /// Install the picker script and watch for the result sentinel
    pub fn setup(
        shared: &SharedDir,
        translator: PathTranslator,
        launcher: Arc<dyn ProcessLauncher>,
        observer: Option<Arc<dyn PickerObserver>>,
        registry: &WatcherRegistry,
    ) -> Result<Arc<Self>, SetupError> {
        scripts::install(shared.root(), PICKER_SCRIPT, &scripts::picker_script())?;

        let bridge = Arc::new(Self::new(shared.clone(), translator, launcher, observer));

        let watcher = registry.get_for_directory(shared.root())?;
        let weak = Arc::downgrade(&bridge);
        watcher.watch(SELECTED_FILE, move || {
            if let Some(bridge) = weak.upgrade() {
                bridge.notify_selected_file_change();
            }
        });

        tracing::info!(script = %bridge.script.display(), "File picker ready");
        Ok(bridge)
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn is_picker_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PickerSnapshot {
        let pending = self.pending.lock().unwrap();
        PickerSnapshot {
            active: self.active.load(Ordering::SeqCst),
            pending: pending.as_ref().map(|p| p.id),
        }
    }

    /// Positional arguments for the helper:
    /// `<start-path> <title> <mode-token> [filter ...]`
    pub fn build_args(&self, request: &PickRequest) -> Vec<String> {
        let start = self.translator.to_helper(&request.start_path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Start path not translatable, passing through");
            request.start_path.clone()
        });

        let mut args = vec![
            start,
            request.mode.title().to_string(),
            request.mode.token().to_string(),
        ];
        args.extend(request.filters.iter().map(FileFilter::render));
        args
    }

    /// Launch the helper and park the request. Fails immediately if another
    /// pick is still pending; nothing is queued.
    pub fn pick(
        &self,
        request: PickRequest,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        let id = {
            let mut pending = self.pending.lock().unwrap();
            if self
                .active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::warn!(mode = ?request.mode, "Pick rejected, picker already open");
                return Err(PickerError::AlreadyOpen);
            }

            self.remove_stale_result();

            let args = self.build_args(&request);
            if let Err(e) = self.launcher.launch(&self.script, &args) {
                self.active.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "Failed to launch picker helper");
                return Err(e.into());
            }

            let id = Uuid::new_v4();
            *pending = Some(PendingPickRequest {
                id,
                mode: request.mode,
                callback: Box::new(on_result),
                created_at: Utc::now(),
            });
            tracing::info!(request_id = %id, mode = request.mode.token(), "Picker opened");
            id
        };

        self.notify_observer(true);
        Ok(id)
    }

    pub fn open_file(
        &self,
        start_path: &str,
        filters: Vec<FileFilter>,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        self.pick(PickRequest::new(start_path, PickMode::OpenFile).with_filters(filters), on_result)
    }

    pub fn open_multiple(
        &self,
        start_path: &str,
        filters: Vec<FileFilter>,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        self.pick(PickRequest::new(start_path, PickMode::OpenMultipleFiles).with_filters(filters), on_result)
    }

    pub fn open_folder(
        &self,
        start_path: &str,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        self.pick(PickRequest::new(start_path, PickMode::OpenFolder), on_result)
    }

    pub fn save(
        &self,
        start_path: &str,
        filters: Vec<FileFilter>,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        self.pick(PickRequest::new(start_path, PickMode::SaveFile).with_filters(filters), on_result)
    }

    pub fn browse(
        &self,
        start_path: &str,
        on_result: impl FnOnce(PickResult) + Send + 'static,
    ) -> Result<Uuid, PickerError> {
        self.pick(PickRequest::new(start_path, PickMode::BrowseFiles), on_result)
    }

    /// Host-context handler for changes to `selectedFile.txt`.
    ///
    /// A missing file (removed before launch, or not written yet) is ignored
    /// and the request stays pending.
    pub fn notify_selected_file_change(&self) {
        let path = self.shared.selected_file();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                self.resolve(&content);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Result sentinel not readable yet");
            }
        }
    }

    /// Resolve the pending request with sentinel `content`.
    ///
    /// The slot and flag are cleared together before the callback runs, so the
    /// callback may start another pick. Returns false if nothing was pending.
    pub fn resolve(&self, content: &str) -> bool {
        let request = {
            let mut pending = self.pending.lock().unwrap();
            let request = pending.take();
            if request.is_some() {
                self.active.store(false, Ordering::SeqCst);
            }
            request
        };

        let Some(request) = request else {
            tracing::debug!("Result sentinel changed with no pick pending");
            return false;
        };

        let result = parse_result(content, request.mode);
        let elapsed_ms = (Utc::now() - request.created_at).num_milliseconds();
        match &result {
            PickResult::Cancelled => {
                tracing::info!(request_id = %request.id, elapsed_ms, "Pick cancelled")
            }
            PickResult::Single(path) => {
                tracing::info!(request_id = %request.id, elapsed_ms, path = %path.display(), "Pick resolved")
            }
            PickResult::Multiple(paths) => {
                tracing::info!(request_id = %request.id, elapsed_ms, count = paths.len(), "Pick resolved")
            }
        }

        self.notify_observer(false);
        (request.callback)(result);
        true
    }

    fn remove_stale_result(&self) {
        let path = self.shared.selected_file();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed previous pick result"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove previous pick result"),
        }
    }

    fn notify_observer(&self, active: bool) {
        if let Some(observer) = &self.observer {
            observer.on_picker_active_changed(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{RecordedLauncher, RecordingObserver};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn bridge(dir: &TempDir, launcher: RecordedLauncher) -> PickerBridge {
        PickerBridge::new(
            SharedDir::new(dir.path()),
            PathTranslator::new("/home/u/.wine", 'z'),
            Arc::new(launcher),
            None,
        )
    }

    fn capture() -> (Arc<Mutex<Vec<PickResult>>>, impl FnOnce(PickResult) + Send + 'static) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        (results, move |result| sink.lock().unwrap().push(result))
    }

    #[test]
    fn test_mode_encoding() {
        let table = [
            (PickMode::OpenFile, "Select a file", "single"),
            (PickMode::SaveFile, "Save...", "save"),
            (PickMode::OpenFolder, "Select a folder", "dir"),
            (PickMode::OpenMultipleFiles, "Select files", "multi"),
            (PickMode::BrowseFiles, "Browse", "browse"),
        ];
        for (mode, title, token) in table {
            assert_eq!(mode.title(), title);
            assert_eq!(mode.token(), token);
            assert_eq!(PickMode::from_token(token), Some(mode));
        }
        assert_eq!(PickMode::from_token("other"), None);
    }

    #[test]
    fn test_filter_render() {
        assert_eq!(FileFilter::new("Text", &["*.txt"]).render(), "Text|*.txt");
        assert_eq!(FileFilter::new("Images", &["*.png", "*.jpg"]).render(), "Images|*.png *.jpg");
    }

    #[test]
    fn test_parse_result() {
        assert_eq!(parse_result("-1", PickMode::OpenFile), PickResult::Cancelled);
        assert_eq!(parse_result("-1\n", PickMode::OpenMultipleFiles), PickResult::Cancelled);
        assert_eq!(
            parse_result("/path/to/chosen.txt\n", PickMode::OpenFile),
            PickResult::Single(PathBuf::from("/path/to/chosen.txt"))
        );
        assert_eq!(
            parse_result("a/b.txt\nc/d.txt\n", PickMode::OpenMultipleFiles),
            PickResult::Multiple(vec![PathBuf::from("a/b.txt"), PathBuf::from("c/d.txt")])
        );
        assert_eq!(
            parse_result("a/b.txt\n\n\nc/d.txt\r\n", PickMode::OpenMultipleFiles),
            PickResult::Multiple(vec![PathBuf::from("a/b.txt"), PathBuf::from("c/d.txt")])
        );
        // Paths with spaces stay whole
        assert_eq!(
            parse_result("/home/u/My Music/a b.ogg", PickMode::OpenFile),
            PickResult::Single(PathBuf::from("/home/u/My Music/a b.ogg"))
        );
    }

    #[test]
    fn test_blank_content_is_cancellation() {
        assert_eq!(parse_result("", PickMode::OpenFile), PickResult::Cancelled);
        assert_eq!(parse_result("  \n\n", PickMode::OpenMultipleFiles), PickResult::Cancelled);
    }

    #[test]
    fn test_build_args() {
        let dir = TempDir::new().unwrap();
        let picker = bridge(&dir, RecordedLauncher::new());
        let request = PickRequest::new(r"C:\Users\x", PickMode::OpenFile).with_filters(vec![
            FileFilter::new("Text", &["*.txt"]),
            FileFilter::new("Levels", &["*.gmd", "*.gmd2"]),
        ]);

        assert_eq!(
            picker.build_args(&request),
            vec![
                "/home/u/.wine/drive_c/Users/x".to_string(),
                "Select a file".to_string(),
                "single".to_string(),
                "Text|*.txt".to_string(),
                "Levels|*.gmd *.gmd2".to_string(),
            ]
        );
    }

    #[test]
    fn test_pick_launches_helper_and_sets_active() {
        let dir = TempDir::new().unwrap();
        let launcher = RecordedLauncher::new();
        let picker = bridge(&dir, launcher.clone());
        let (_results, on_result) = capture();

        let id = picker.open_folder(r"Z:\home\u", on_result).unwrap();

        assert!(picker.is_picker_active());
        assert_eq!(picker.snapshot(), PickerSnapshot { active: true, pending: Some(id) });
        let launch = launcher.last().unwrap();
        assert_eq!(launch.program, dir.path().join(PICKER_SCRIPT));
        assert_eq!(launch.args, vec!["/home/u", "Select a folder", "dir"]);
    }

    #[test]
    fn test_second_pick_fails_without_touching_first() {
        let dir = TempDir::new().unwrap();
        let launcher = RecordedLauncher::new();
        let picker = bridge(&dir, launcher.clone());
        let (first_results, first) = capture();
        let (second_results, second) = capture();

        let id = picker.open_file("", vec![], first).unwrap();
        let err = picker.save("", vec![], second).unwrap_err();

        assert!(matches!(err, PickerError::AlreadyOpen));
        assert_eq!(launcher.call_count(), 1);
        assert_eq!(picker.snapshot().pending, Some(id));

        assert!(picker.resolve("/a.txt"));
        assert_eq!(*first_results.lock().unwrap(), vec![PickResult::Single(PathBuf::from("/a.txt"))]);
        assert!(second_results.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_fires_exactly_once() {
        let dir = TempDir::new().unwrap();
        let picker = bridge(&dir, RecordedLauncher::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);

        picker
            .open_multiple("", vec![], move |result| {
                assert_eq!(result, PickResult::Multiple(vec![PathBuf::from("a/b.txt"), PathBuf::from("c/d.txt")]));
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(picker.resolve("a/b.txt\nc/d.txt\n"));
        assert!(!picker.resolve("a/b.txt\nc/d.txt\n"));
        assert!(!picker.resolve("-1"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(picker.snapshot(), PickerSnapshot { active: false, pending: None });
    }

    #[test]
    fn test_cancel_fires_cancelled_only() {
        let dir = TempDir::new().unwrap();
        let picker = bridge(&dir, RecordedLauncher::new());
        let (results, on_result) = capture();

        picker.open_file("", vec![], on_result).unwrap();
        picker.resolve("-1");

        assert_eq!(*results.lock().unwrap(), vec![PickResult::Cancelled]);
        assert!(!picker.is_picker_active());
    }

    #[test]
    fn test_launch_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let picker = bridge(&dir, RecordedLauncher::always_fail(LaunchError::SpawnFailed("no bash".into())));
        let (results, on_result) = capture();

        let err = picker.open_file("", vec![], on_result).unwrap_err();

        assert!(matches!(err, PickerError::Launch(_)));
        assert_eq!(picker.snapshot(), PickerSnapshot { active: false, pending: None });
        assert!(results.lock().unwrap().is_empty());
    }

    #[test]
    fn test_callback_may_start_next_pick() {
        let dir = TempDir::new().unwrap();
        let launcher = RecordedLauncher::new();
        let picker = Arc::new(bridge(&dir, launcher.clone()));
        let chained = Arc::new(Mutex::new(None));

        let p = Arc::clone(&picker);
        let slot = Arc::clone(&chained);
        picker
            .open_file("", vec![], move |_| {
                *slot.lock().unwrap() = Some(p.browse("", |_| {}).is_ok());
            })
            .unwrap();
        picker.resolve("/a.txt");

        assert_eq!(*chained.lock().unwrap(), Some(true));
        assert!(picker.is_picker_active());
        assert_eq!(launcher.call_count(), 2);
    }

    #[test]
    fn test_observer_sees_transitions() {
        let dir = TempDir::new().unwrap();
        let observer = RecordingObserver::new();
        let picker = PickerBridge::new(
            SharedDir::new(dir.path()),
            PathTranslator::new("/p", 'z'),
            Arc::new(RecordedLauncher::new()),
            Some(Arc::new(observer.clone())),
        );

        picker.open_file("", vec![], |_| {}).unwrap();
        let _ = picker.open_file("", vec![], |_| {});
        picker.resolve("-1");

        assert_eq!(observer.transitions(), vec![true, false]);
    }

    #[test]
    fn test_stale_result_removed_before_launch() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::new(dir.path());
        std::fs::write(shared.selected_file(), "/old/result.txt").unwrap();
        let picker = bridge(&dir, RecordedLauncher::new());
        let (results, on_result) = capture();

        picker.open_file("", vec![], on_result).unwrap();
        // A change event racing the helper finds nothing to read
        picker.notify_selected_file_change();

        assert!(!shared.selected_file().exists());
        assert!(picker.is_picker_active());
        assert!(results.lock().unwrap().is_empty());

        std::fs::write(shared.selected_file(), "/new/result.txt\n").unwrap();
        picker.notify_selected_file_change();
        assert_eq!(*results.lock().unwrap(), vec![PickResult::Single(PathBuf::from("/new/result.txt"))]);
    }

    #[test]
    fn test_concurrent_picks_single_flight() {
        let dir = TempDir::new().unwrap();
        let launcher = RecordedLauncher::new();
        let picker = Arc::new(bridge(&dir, launcher.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let picker = Arc::clone(&picker);
                std::thread::spawn(move || picker.open_file("", vec![], |_| {}).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let snapshot = picker.snapshot();
        assert!(snapshot.active);
        assert!(snapshot.pending.is_some());
        assert_eq!(launcher.call_count(), 1);
    }

    #[test]
    fn test_flag_and_slot_never_diverge() {
        let dir = TempDir::new().unwrap();
        let picker = Arc::new(bridge(&dir, RecordedLauncher::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let resolved = Arc::new(AtomicUsize::new(0));

        let openers: Vec<_> = (0..4)
            .map(|_| {
                let picker = Arc::clone(&picker);
                let stop = Arc::clone(&stop);
                let resolved = Arc::clone(&resolved);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        let resolved = Arc::clone(&resolved);
                        let _ = picker.open_file("", vec![], move |_| {
                            resolved.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        let resolver = {
            let picker = Arc::clone(&picker);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut count = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    if picker.resolve("/x.txt") {
                        count += 1;
                    }
                }
                count
            })
        };

        for _ in 0..2000 {
            let snapshot = picker.snapshot();
            assert_eq!(snapshot.active, snapshot.pending.is_some());
        }

        stop.store(true, Ordering::SeqCst);
        for handle in openers {
            handle.join().unwrap();
        }
        let resolutions = resolver.join().unwrap();

        // Every resolution fired exactly one callback
        assert_eq!(resolved.load(Ordering::SeqCst), resolutions);
        let snapshot = picker.snapshot();
        assert_eq!(snapshot.active, snapshot.pending.is_some());
    }
}
