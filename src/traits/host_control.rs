//! Host-facing traits: graceful termination and picker UI notification

/// Trait for asking the host process to shut itself down
///
/// Production: atomic flag polled by the host loop
/// Testing: Recorded exit requests
#[cfg_attr(test, mockall::automock)]
pub trait HostControl: Send + Sync {
    /// Request a graceful exit. May be called from the host context only.
    fn request_exit(&self);
}

/// Receives picker-active transitions (the "waiting for picker" popup)
#[cfg_attr(test, mockall::automock)]
pub trait PickerObserver: Send + Sync {
    fn on_picker_active_changed(&self, active: bool);
}
