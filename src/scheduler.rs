//! Cooperative tick-driven timers on the host context
//!
//! The host calls [`Scheduler::update`] once per frame. Nothing here spawns a
//! thread or blocks; callbacks must return quickly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type TaskCallback = Arc<dyn Fn() + Send + Sync>;

struct ScheduledTask {
    callback: TaskCallback,
    /// Zero fires on every tick
    interval: Duration,
    elapsed: Duration,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repeating callback. Re-registering an id replaces it and
    /// restarts its clock.
    pub fn schedule(
        &self,
        id: impl Into<String>,
        callback: impl Fn() + Send + Sync + 'static,
        interval: Duration,
    ) {
        let id = id.into();
        tracing::debug!(id = %id, interval_ms = interval.as_millis() as u64, "Task scheduled");
        self.tasks.lock().unwrap().insert(
            id,
            ScheduledTask {
                callback: Arc::new(callback),
                interval,
                elapsed: Duration::ZERO,
            },
        );
    }

    /// Register a callback that fires on every tick
    pub fn schedule_every_tick(&self, id: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) {
        self.schedule(id, callback, Duration::ZERO);
    }

    /// Remove a task. Unknown ids are ignored.
    pub fn unschedule(&self, id: &str) {
        if self.tasks.lock().unwrap().remove(id).is_some() {
            tracing::debug!(id = %id, "Task unscheduled");
        }
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance every task by `dt` and fire the ones that reached their interval.
    ///
    /// A task fires at most once per tick; one interval is subtracted so any
    /// overshoot carries into the next tick. Callbacks run without the
    /// registry lock held, so they may schedule or unschedule freely.
    pub fn update(&self, dt: Duration) {
        let due: Vec<(String, TaskCallback)> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks
                .iter_mut()
                .filter_map(|(id, task)| {
                    task.elapsed += dt;
                    if task.elapsed < task.interval {
                        return None;
                    }
                    if task.interval.is_zero() {
                        task.elapsed = Duration::ZERO;
                    } else {
                        task.elapsed -= task.interval;
                    }
                    Some((id.clone(), Arc::clone(&task.callback)))
                })
                .collect()
        };

        for (id, callback) in due {
            // An earlier callback in this tick may have removed it
            if self.is_scheduled(&id) {
                callback();
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("tasks", &self.len()).finish()
    }
}
