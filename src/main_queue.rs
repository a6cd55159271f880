//! Hand-off queue into the host's single-threaded execution context
//!
//! Background threads never touch request state directly. They queue a
//! closure here and the host runs it on its next tick via [`MainQueue::drain`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub type MainTask = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct MainQueue {
    tasks: Arc<Mutex<VecDeque<MainTask>>>,
}

impl MainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task from any thread
    pub fn queue(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().unwrap().push_back(Box::new(task));
    }

    /// Run every task queued before this call, in FIFO order.
    ///
    /// Tasks queued by the tasks themselves wait for the next drain.
    pub fn drain(&self) -> usize {
        let batch: Vec<MainTask> = self.tasks.lock().unwrap().drain(..).collect();
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue").field("pending", &self.pending()).finish()
    }
}
