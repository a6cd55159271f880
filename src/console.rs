//! Live scrollback console proxied through `console.ansi`
//!
//! The host appends colored log lines to a shared file; the console helper
//! tails it in a real terminal and proves it is alive through
//! `console.heartbeat`. The first heartbeat pushes the color palette and
//! starts the [`HeartbeatMonitor`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::main_queue::MainQueue;
use crate::scripts::{self, CONSOLE_SCRIPT};
use crate::sentinel::{SharedDir, CONSOLE_HEARTBEAT};
use crate::traits::{HostControl, ProcessLauncher};
use crate::directory_watcher::WatcherRegistry;

// ============================================================================
// FileAppender
// ============================================================================

/// Serialized, flush-on-every-write appender.
///
/// Concurrent callers never interleave partial writes.
#[derive(Debug)]
pub struct FileAppender {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAppender {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, data: &str) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.write_all(data.as_bytes())?;
        file.flush()
    }
}

// ============================================================================
// Colors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Lowercase `rrggbb`, no leading `#`
    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl std::str::FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(format!("Invalid color: {s}"));
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| format!("Invalid color: {s}"));
        Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        format!("#{}", value.hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolePalette {
    pub foreground: Rgb,
    pub background: Rgb,
    pub info: Rgb,
    pub warn: Rgb,
    pub error: Rgb,
    pub debug: Rgb,
}

impl Default for ConsolePalette {
    fn default() -> Self {
        Self {
            foreground: Rgb(0xff, 0xff, 0xff),
            background: Rgb(0x00, 0x00, 0x00),
            info: Rgb(0x4f, 0xb0, 0xff),
            warn: Rgb(0xff, 0xe0, 0x66),
            error: Rgb(0xff, 0x55, 0x55),
            debug: Rgb(0x8a, 0x8a, 0x8a),
        }
    }
}

impl ConsolePalette {
    /// OSC sequences that recolor the terminal, followed by a no-op cursor
    /// move that forces a redraw.
    pub fn escape_sequences(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("\x1b]10;#{}\x07", self.foreground.hex()));
        out.push_str(&format!("\x1b]11;#{}\x07", self.background.hex()));
        for (severity, color) in [
            (Severity::Info, self.info),
            (Severity::Warning, self.warn),
            (Severity::Error, self.error),
            (Severity::Debug, self.debug),
        ] {
            out.push_str(&format!("\x1b]4;{};#{}\x07", severity.palette_slot(), color.hex()));
        }
        out.push_str("\x1b[A\x1b[B");
        out
    }
}

// ============================================================================
// LogLine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// 256-color palette index the line prefix is drawn with
    pub fn palette_slot(&self) -> u8 {
        match self {
            Severity::Debug => 243,
            Severity::Info => 33,
            Severity::Warning => 229,
            Severity::Error => 9,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO ",
            Severity::Warning => "WARN ",
            Severity::Error => "ERROR",
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("Unknown severity: {other}")),
        }
    }
}

/// One formatted-then-forgotten console line
#[derive(Debug, Clone)]
pub struct LogLine {
    pub severity: Severity,
    pub component: String,
    pub thread: Option<String>,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn format(&self, with_millis: bool) -> String {
        let time = if with_millis {
            self.timestamp.format("%H:%M:%S%.3f")
        } else {
            self.timestamp.format("%H:%M:%S")
        };
        let thread = self
            .thread
            .as_deref()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default();

        format!(
            "\x1b[38;5;{}m{} {}\x1b[0m {}[{}]: {}\n",
            self.severity.palette_slot(),
            time,
            self.severity.label(),
            thread,
            self.component,
            self.message
        )
    }
}

// ============================================================================
// ConsoleBridge
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub font_size: u32,
    pub palette: ConsolePalette,
    pub log_milliseconds: bool,
    pub heartbeat_threshold: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            font_size: 10,
            palette: ConsolePalette::default(),
            log_milliseconds: false,
            heartbeat_threshold: Duration::from_millis(5000),
        }
    }
}

pub struct ConsoleBridge {
    shared: SharedDir,
    settings: ConsoleSettings,
    appender: Arc<FileAppender>,
    heartbeat: HeartbeatMonitor,
}

impl ConsoleBridge {
    /// Truncate the log stream, install the console script, start watching
    /// for heartbeats and launch the helper.
    pub fn setup(
        shared: &SharedDir,
        settings: ConsoleSettings,
        registry: &WatcherRegistry,
        launcher: &dyn ProcessLauncher,
        host: Arc<dyn HostControl>,
        main_queue: MainQueue,
    ) -> Result<Arc<Self>, SetupError> {
        let ansi = shared.console_ansi();
        std::fs::write(&ansi, "").map_err(|e| SetupError::shared_dir(&ansi, e))?;
        let appender = FileAppender::open(&ansi).map_err(|e| SetupError::shared_dir(&ansi, e))?;

        let script = scripts::install(shared.root(), CONSOLE_SCRIPT, &scripts::console_script())?;

        if let Err(e) = shared.clear_exit_sentinel() {
            tracing::warn!(error = %e, "Failed to remove stale console exit file");
        }

        let heartbeat = HeartbeatMonitor::new(
            HeartbeatConfig::new(shared.console_heartbeat(), settings.heartbeat_threshold),
            host,
            main_queue,
        );

        let bridge = Arc::new(Self {
            shared: shared.clone(),
            settings,
            appender: Arc::new(appender),
            heartbeat,
        });

        let watcher = registry.get_for_directory(shared.root())?;
        let weak = Arc::downgrade(&bridge);
        watcher.watch(CONSOLE_HEARTBEAT, move || {
            if let Some(bridge) = weak.upgrade() {
                bridge.on_heartbeat();
            }
        });

        let args = vec![
            shared.root().to_string_lossy().into_owned(),
            bridge.settings.font_size.to_string(),
            format!("#{}", bridge.settings.palette.foreground.hex()),
            format!("#{}", bridge.settings.palette.background.hex()),
        ];
        if let Err(e) = launcher.launch(&script, &args) {
            watcher.unwatch(CONSOLE_HEARTBEAT);
            return Err(e.into());
        }

        tracing::info!(shared_dir = %shared.root().display(), "Console helper launched");
        Ok(bridge)
    }

    pub fn appender(&self) -> Arc<FileAppender> {
        Arc::clone(&self.appender)
    }

    pub fn settings(&self) -> &ConsoleSettings {
        &self.settings
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn append(&self, text: &str) -> std::io::Result<()> {
        self.appender.append(text)
    }

    pub fn log(&self, line: &LogLine) -> std::io::Result<()> {
        self.appender.append(&line.format(self.settings.log_milliseconds))
    }

    pub fn push_palette(&self) -> std::io::Result<()> {
        self.appender.append(&self.settings.palette.escape_sequences())
    }

    /// Runs on the host context for every heartbeat write. Only the first
    /// one does anything.
    pub fn on_heartbeat(&self) {
        match self.heartbeat.start() {
            Ok(true) => {
                tracing::info!("Console helper connected");
                if let Err(e) = self.push_palette() {
                    tracing::warn!(error = %e, "Failed to push console palette");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Failed to start heartbeat monitor"),
        }
    }

    /// Tell the helper to exit and stop monitoring it
    pub fn shutdown(&self) {
        self.heartbeat.stop(None);
        if let Err(e) = self.shared.write_exit_sentinel() {
            tracing::error!(error = %e, "Failed to create console exit file");
        }
    }
}
