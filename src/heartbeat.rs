//! Liveness monitoring of the console helper
//!
//! The helper rewrites `console.heartbeat` with its wall-clock time in epoch
//! milliseconds roughly every 16 ms. If the newest sample is older than the
//! configured threshold the helper is presumed dead and the host is asked to
//! exit, once. An unreadable or half-written file is a transient state and is
//! retried, but only up to `max_unreadable` before the monitor gives up.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::main_queue::MainQueue;
use crate::scheduler::Scheduler;
use crate::traits::HostControl;

const SCHEDULER_TASK_ID: &str = "console-heartbeat";

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Heartbeat unreadable for {0:?}")]
    Unavailable(Duration),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub path: PathBuf,
    pub threshold: Duration,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub max_unreadable: Duration,
}

impl HeartbeatConfig {
    pub fn new(path: impl Into<PathBuf>, threshold: Duration) -> Self {
        Self {
            path: path.into(),
            threshold,
            poll_interval: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
            max_unreadable: Duration::from_secs(2),
        }
    }
}

/// Outcome of reading one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Alive { age_ms: i64 },
    Stale { age_ms: i64 },
    /// The file could not be read (not written yet, or gone)
    Missing,
    /// The file exists but does not hold an integer (mid-write)
    Unparsable,
}

impl HeartbeatStatus {
    fn is_transient(&self) -> bool {
        matches!(self, HeartbeatStatus::Missing | HeartbeatStatus::Unparsable)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Strictly older than the threshold. An age that doesn't fit in `i64`
/// counts as stale.
pub fn is_stale(sample_ms: i64, now_ms: i64, threshold: Duration) -> bool {
    match now_ms.checked_sub(sample_ms) {
        Some(age_ms) => age_ms > threshold.as_millis() as i64,
        None => true,
    }
}

/// Read and classify the heartbeat file against `now_ms`
pub fn check_file(path: &Path, now_ms: i64, threshold: Duration) -> HeartbeatStatus {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return HeartbeatStatus::Missing,
    };

    let sample_ms: i64 = match text.trim().parse() {
        Ok(ms) => ms,
        Err(_) => return HeartbeatStatus::Unparsable,
    };

    // Out-of-range samples can't come from a live helper's clock
    let Some(age_ms) = now_ms.checked_sub(sample_ms) else {
        return HeartbeatStatus::Unparsable;
    };
    if is_stale(sample_ms, now_ms, threshold) {
        HeartbeatStatus::Stale { age_ms }
    } else {
        HeartbeatStatus::Alive { age_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleAction {
    Wait(Duration),
    Terminate,
    GiveUp,
}

/// Tracks how long the file has been continuously unreadable
#[derive(Debug, Default)]
struct CycleState {
    unreadable_since: Option<Instant>,
}

impl CycleState {
    fn next(&mut self, status: HeartbeatStatus, now: Instant, config: &HeartbeatConfig) -> CycleAction {
        if status.is_transient() {
            let since = *self.unreadable_since.get_or_insert(now);
            if now.duration_since(since) >= config.max_unreadable {
                return CycleAction::GiveUp;
            }
            return CycleAction::Wait(config.retry_delay);
        }

        self.unreadable_since = None;
        match status {
            HeartbeatStatus::Stale { .. } => CycleAction::Terminate,
            _ => CycleAction::Wait(config.poll_interval),
        }
    }
}

/// Single-instance heartbeat watchdog.
///
/// Starting a second time (in either mode) is a no-op that returns `Ok(false)`.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    host: Arc<dyn HostControl>,
    main_queue: MainQueue,
    active: AtomicBool,
    /// Set once the exit request has been issued
    fired: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, host: Arc<dyn HostControl>, main_queue: MainQueue) -> Self {
        Self {
            config,
            host,
            main_queue,
            active: AtomicBool::new(false),
            fired: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the exit request has been issued
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn check(&self, now_ms: i64) -> HeartbeatStatus {
        check_file(&self.config.path, now_ms, self.config.threshold)
    }

    fn claim(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Start polling on a background thread. The exit request is marshaled
    /// onto the host context.
    pub fn start(&self) -> Result<bool, HeartbeatError> {
        if !self.claim() {
            return Ok(false);
        }

        let config = self.config.clone();
        let host = Arc::clone(&self.host);
        let main_queue = self.main_queue.clone();
        let fired = Arc::clone(&self.fired);
        let cancel = Arc::clone(&self.cancel);

        let handle = std::thread::Builder::new()
            .name("console-heartbeat".into())
            .spawn(move || run_worker(config, host, main_queue, fired, cancel))
            .map_err(|e| {
                self.active.store(false, Ordering::SeqCst);
                HeartbeatError::SpawnFailed(e.to_string())
            })?;

        *self.worker.lock().unwrap() = Some(handle);
        tracing::info!(path = %self.config.path.display(), threshold_ms = self.config.threshold.as_millis() as u64, "Heartbeat monitor started");
        Ok(true)
    }

    /// Poll from the host context through the scheduler instead of a thread.
    /// Transient read failures simply wait for the next interval.
    pub fn start_scheduled(&self, scheduler: &Scheduler) -> bool {
        if !self.claim() {
            return false;
        }

        let config = self.config.clone();
        let host = Arc::clone(&self.host);
        let fired = Arc::clone(&self.fired);
        let cancel = Arc::clone(&self.cancel);
        let state = Mutex::new(CycleState::default());

        scheduler.schedule(
            SCHEDULER_TASK_ID,
            move || {
                if fired.load(Ordering::SeqCst) || cancel.load(Ordering::SeqCst) {
                    return;
                }
                let status = check_file(&config.path, now_millis(), config.threshold);
                let action = state.lock().unwrap().next(status, Instant::now(), &config);
                match action {
                    CycleAction::Wait(_) => {}
                    CycleAction::Terminate => {
                        if !fired.swap(true, Ordering::SeqCst) {
                            tracing::error!(?status, "Console helper stopped responding, exiting host");
                            host.request_exit();
                        }
                    }
                    CycleAction::GiveUp => {
                        if !cancel.swap(true, Ordering::SeqCst) {
                            tracing::error!(error = %HeartbeatError::Unavailable(config.max_unreadable), "Heartbeat monitoring disabled");
                        }
                    }
                }
            },
            self.config.poll_interval,
        );

        tracing::info!(path = %self.config.path.display(), "Heartbeat monitor scheduled");
        true
    }

    /// Cancel the worker (or scheduled task) and wait for it
    pub fn stop(&self, scheduler: Option<&Scheduler>) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(scheduler) = scheduler {
            scheduler.unschedule(SCHEDULER_TASK_ID);
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Heartbeat thread panicked");
            }
        }
    }

    /// Whether the background thread is still polling
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop(None);
    }
}

fn run_worker(
    config: HeartbeatConfig,
    host: Arc<dyn HostControl>,
    main_queue: MainQueue,
    fired: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) {
    let mut state = CycleState::default();

    while !cancel.load(Ordering::SeqCst) {
        let status = check_file(&config.path, now_millis(), config.threshold);
        match state.next(status, Instant::now(), &config) {
            CycleAction::Wait(delay) => sleep_unless_cancelled(delay, &cancel),
            CycleAction::Terminate => {
                if !fired.swap(true, Ordering::SeqCst) {
                    tracing::error!(?status, "Console helper stopped responding, exiting host");
                    main_queue.queue(move || host.request_exit());
                }
                return;
            }
            CycleAction::GiveUp => {
                tracing::error!(
                    error = %HeartbeatError::Unavailable(config.max_unreadable),
                    path = %config.path.display(),
                    "Heartbeat monitoring disabled"
                );
                return;
            }
        }
    }
    tracing::debug!("Heartbeat monitor cancelled");
}

fn sleep_unless_cancelled(delay: Duration, cancel: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + delay;
    while !cancel.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordedHostControl;
    use tempfile::TempDir;

    const THRESHOLD: Duration = Duration::from_millis(5000);

    fn write_sample(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("console.heartbeat");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_threshold_boundaries() {
        let now = 1_700_000_000_000;
        assert!(!is_stale(now - 4000, now, THRESHOLD));
        assert!(!is_stale(now - 5000, now, THRESHOLD));
        assert!(is_stale(now - 5001, now, THRESHOLD));
        assert!(is_stale(now - 6000, now, THRESHOLD));
    }

    #[test]
    fn test_check_file_classifies_samples() {
        let dir = TempDir::new().unwrap();
        let now = 1_700_000_000_000i64;

        let path = write_sample(&dir, &format!("{}\n", now - 4000));
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Alive { age_ms: 4000 });

        write_sample(&dir, &(now - 6000).to_string());
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Stale { age_ms: 6000 });

        write_sample(&dir, "");
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Unparsable);

        write_sample(&dir, "12ab");
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Unparsable);

        let missing = dir.path().join("nope");
        assert_eq!(check_file(&missing, now, THRESHOLD), HeartbeatStatus::Missing);
    }

    #[test]
    fn test_extreme_samples_do_not_overflow() {
        let dir = TempDir::new().unwrap();
        let now = 1_700_000_000_000i64;

        let path = write_sample(&dir, &i64::MIN.to_string());
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Unparsable);
        assert!(is_stale(i64::MIN, now, THRESHOLD));

        write_sample(&dir, &i64::MAX.to_string());
        assert_eq!(check_file(&path, -now, THRESHOLD), HeartbeatStatus::Unparsable);

        // A sample from the future is fresh, not stale
        write_sample(&dir, &(now + 1000).to_string());
        assert_eq!(check_file(&path, now, THRESHOLD), HeartbeatStatus::Alive { age_ms: -1000 });
    }

    #[test]
    fn test_extreme_sample_gives_up_without_exit() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &i64::MIN.to_string());
        let host = RecordedHostControl::new();
        let queue = MainQueue::new();
        let mut config = HeartbeatConfig::new(path, THRESHOLD);
        config.max_unreadable = Duration::from_millis(100);
        let monitor = HeartbeatMonitor::new(config, Arc::new(host.clone()), queue.clone());

        monitor.start().unwrap();
        assert!(wait_until(|| !monitor.is_running()));
        queue.drain();

        assert!(!monitor.has_fired());
        assert_eq!(host.exit_count(), 0);
    }

    #[test]
    fn test_cycle_state_gives_up_after_max_unreadable() {
        let config = HeartbeatConfig::new("/unused", THRESHOLD);
        let mut state = CycleState::default();
        let t0 = Instant::now();

        assert_eq!(state.next(HeartbeatStatus::Missing, t0, &config), CycleAction::Wait(config.retry_delay));
        assert_eq!(
            state.next(HeartbeatStatus::Unparsable, t0 + Duration::from_secs(1), &config),
            CycleAction::Wait(config.retry_delay)
        );
        // A good read resets the clock
        assert_eq!(
            state.next(HeartbeatStatus::Alive { age_ms: 10 }, t0 + Duration::from_millis(1500), &config),
            CycleAction::Wait(config.poll_interval)
        );
        assert_eq!(
            state.next(HeartbeatStatus::Missing, t0 + Duration::from_millis(2500), &config),
            CycleAction::Wait(config.retry_delay)
        );
        assert_eq!(
            state.next(HeartbeatStatus::Missing, t0 + Duration::from_millis(4500), &config),
            CycleAction::GiveUp
        );
        assert_eq!(
            state.next(HeartbeatStatus::Stale { age_ms: 9000 }, t0 + Duration::from_secs(5), &config),
            CycleAction::Terminate
        );
    }

    #[test]
    fn test_stale_heartbeat_requests_exit_once_on_host_context() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &(now_millis() - 6000).to_string());
        let host = RecordedHostControl::new();
        let queue = MainQueue::new();
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::new(path, THRESHOLD), Arc::new(host.clone()), queue.clone());

        monitor.start().unwrap();
        assert!(wait_until(|| queue.pending() == 1));
        assert!(wait_until(|| !monitor.is_running()));

        // Not called from the monitor thread
        assert_eq!(host.exit_count(), 0);
        queue.drain();
        assert_eq!(host.exit_count(), 1);
        assert!(monitor.has_fired());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_fresh_heartbeat_keeps_host_alive() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &now_millis().to_string());
        let host = RecordedHostControl::new();
        let queue = MainQueue::new();
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::new(path, THRESHOLD), Arc::new(host.clone()), queue.clone());

        monitor.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));

        assert!(monitor.is_running());
        assert_eq!(queue.pending(), 0);
        monitor.stop(None);
        assert!(!monitor.is_running());
        assert_eq!(host.exit_count(), 0);
    }

    #[test]
    fn test_start_twice_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &now_millis().to_string());
        let monitor = HeartbeatMonitor::new(
            HeartbeatConfig::new(path, THRESHOLD),
            Arc::new(RecordedHostControl::new()),
            MainQueue::new(),
        );
        let scheduler = Scheduler::new();

        assert!(monitor.start().unwrap());
        assert!(!monitor.start().unwrap());
        assert!(!monitor.start_scheduled(&scheduler));
        assert!(scheduler.is_empty());
        monitor.stop(None);
    }

    #[test]
    fn test_missing_heartbeat_gives_up_without_exit() {
        let dir = TempDir::new().unwrap();
        let mut config = HeartbeatConfig::new(dir.path().join("console.heartbeat"), THRESHOLD);
        config.max_unreadable = Duration::from_millis(60);
        let host = RecordedHostControl::new();
        let queue = MainQueue::new();
        let monitor = HeartbeatMonitor::new(config, Arc::new(host.clone()), queue.clone());

        monitor.start().unwrap();
        assert!(wait_until(|| !monitor.is_running()));

        queue.drain();
        assert_eq!(host.exit_count(), 0);
        assert!(!monitor.has_fired());
    }

    #[test]
    fn test_scheduled_mode_fires_once() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &(now_millis() - 6000).to_string());
        let mut host = crate::traits::MockHostControl::new();
        host.expect_request_exit().times(1).return_const(());

        let scheduler = Scheduler::new();
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::new(path, THRESHOLD), Arc::new(host), MainQueue::new());
        assert!(monitor.start_scheduled(&scheduler));

        scheduler.update(Duration::from_millis(20));
        assert!(!monitor.has_fired());
        for _ in 0..10 {
            scheduler.update(Duration::from_millis(50));
        }
        assert!(monitor.has_fired());

        monitor.stop(Some(&scheduler));
        assert!(scheduler.is_empty());
    }
}
