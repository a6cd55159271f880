//! Sandbox Bridge - native file pickers and a live console for sandboxed hosts
//!
//! A host running inside a compatibility layer can't open native windows. This
//! library proxies those through helper scripts and a shared directory, with
//! results coming back as sentinel files. External collaborators sit behind
//! the seams in [`traits`] for testability.

pub mod traits;
pub mod mocks;
pub mod production;

pub mod config;
pub mod console;
pub mod console_layer;
pub mod directory_watcher;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod main_queue;
pub mod paths;
pub mod picker;
pub mod scheduler;
pub mod scripts;
pub mod sentinel;

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{AppConfig, BridgeConfig};
pub use console_layer::{ConsoleLayer, ConsoleSink};
pub use host::{BridgeHost, HostDeps};
pub use main_queue::MainQueue;
pub use picker::{FileFilter, PickMode, PickRequest, PickResult, PickerBridge, PickerError};

/// Initialize logging to stdout, a daily log file and (once attached) the
/// console helper.
pub fn init_logging(log_dir: &Path, config: &BridgeConfig) -> std::io::Result<ConsoleSink> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = rolling::daily(log_dir, "sandbox-bridge.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let sink = ConsoleSink::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sandbox_bridge=info,sandbox_bridge_lib=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .with(ConsoleLayer::new(sink.clone(), config.console_log_level, config.log_milliseconds))
        .init();

    // Keep guard alive for the process lifetime
    std::mem::forget(_guard);

    Ok(sink)
}
