//! SQLite-backed settings store and the typed bridge configuration

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::console::{ConsolePalette, ConsoleSettings, Severity};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

pub struct AppConfig {
    conn: Mutex<Connection>,
}

impl AppConfig {
    /// Create config table in an existing database connection
    pub fn init_table(conn: &Connection) -> Result<(), ConfigError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );"
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))
    }

    /// Open (or create) a settings database on disk
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let conn = Connection::open(path)
            .map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Self::init_table(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open standalone in-memory config (for testing)
    pub fn open_in_memory() -> Result<Self, ConfigError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Self::init_table(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM app_config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );
        let ret = match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConfigError::DatabaseError(e.to_string())),
        };
        tracing::debug!(key = %key, found = ret.as_ref().ok().and_then(|v| v.as_ref()).is_some(), "Config get");
        ret
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config set");
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config delete");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM app_config WHERE key = ?1",
            params![key],
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.get(key)?.map(|v| v == "true").unwrap_or(false))
    }

    /// Parse a value, falling back to `default` when missing or malformed
    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse() {
                Ok(value) => Ok(value),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, "Invalid setting, using default");
                    Ok(default)
                }
            },
        }
    }
}

/// Typed settings read once at startup
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub show_console: bool,
    pub heartbeat_threshold: Duration,
    pub console_font_size: u32,
    pub console_log_level: Severity,
    pub log_milliseconds: bool,
    pub console_palette: ConsolePalette,
    pub shared_dir: PathBuf,
    pub watch_debounce: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            show_console: true,
            heartbeat_threshold: Duration::from_millis(5000),
            console_font_size: 10,
            console_log_level: Severity::Info,
            log_milliseconds: false,
            console_palette: ConsolePalette::default(),
            shared_dir: default_shared_dir(),
            watch_debounce: Duration::from_millis(20),
        }
    }
}

/// `SANDBOX_BRIDGE_DIR`, else `$TMPDIR/sandbox-bridge`
pub fn default_shared_dir() -> PathBuf {
    std::env::var_os("SANDBOX_BRIDGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("sandbox-bridge"))
}

impl BridgeConfig {
    pub fn load(config: &AppConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let show_console = match config.get("show_console")? {
            Some(value) => value != "false",
            None => defaults.show_console,
        };

        let console_palette = match config.get("console_palette")? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid console_palette, using default");
                defaults.console_palette
            }),
            None => defaults.console_palette,
        };

        let shared_dir = match std::env::var_os("SANDBOX_BRIDGE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => config.get("shared_dir")?.map(PathBuf::from).unwrap_or(defaults.shared_dir),
        };

        Ok(Self {
            show_console,
            heartbeat_threshold: Duration::from_millis(
                config.get_parsed("heartbeat_threshold_ms", defaults.heartbeat_threshold.as_millis() as u64)?,
            ),
            console_font_size: config.get_parsed("console_font_size", defaults.console_font_size)?,
            console_log_level: config.get_parsed("console_log_level", defaults.console_log_level)?,
            log_milliseconds: config.get_bool("log_milliseconds")?,
            console_palette,
            shared_dir,
            watch_debounce: Duration::from_millis(
                config.get_parsed("watch_debounce_ms", defaults.watch_debounce.as_millis() as u64)?,
            ),
        })
    }

    pub fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            font_size: self.console_font_size,
            palette: self.console_palette,
            log_milliseconds: self.log_milliseconds,
            heartbeat_threshold: self.heartbeat_threshold,
        }
    }
}
