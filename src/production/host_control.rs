//! Exit flag polled by the host loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::HostControl;

#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    requested: Arc<AtomicBool>,
}

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl HostControl for ExitFlag {
    fn request_exit(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::warn!("Host exit requested");
        }
    }
}
