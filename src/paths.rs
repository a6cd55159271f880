//! Path translation between the host's drive-letter convention and the
//! helper's POSIX convention.
//!
//! `C:\a\b` lives at `<prefix>/drive_c/a/b` on the helper side. The
//! passthrough drive (normally `Z:`) is mounted at `/`, so `Z:\home\u` is
//! simply `/home/u`.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Not an absolute drive path: {0}")]
    NotAbsolute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    prefix: PathBuf,
    passthrough_drive: char,
}

impl PathTranslator {
    pub fn new(prefix: impl Into<PathBuf>, passthrough_drive: char) -> Self {
        Self {
            prefix: prefix.into(),
            passthrough_drive: passthrough_drive.to_ascii_lowercase(),
        }
    }

    /// Prefix from `WINEPREFIX`, falling back to `$HOME/.wine`
    pub fn from_env() -> Self {
        let prefix = std::env::var_os("WINEPREFIX")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".wine")))
            .unwrap_or_else(|| PathBuf::from("/.wine"));
        tracing::debug!(prefix = %prefix.display(), "Path translation prefix");
        Self::new(prefix, 'z')
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Host path to helper path.
    ///
    /// Paths that already look like POSIX absolute paths pass through
    /// unchanged; an empty path stays empty so the helper picks its default.
    pub fn to_helper(&self, host_path: &str) -> Result<String, PathError> {
        if host_path.is_empty() || host_path.starts_with('/') {
            return Ok(host_path.to_string());
        }

        let mut chars = host_path.chars();
        let (drive, colon) = (chars.next(), chars.next());
        let drive = match (drive, colon) {
            (Some(d), Some(':')) if d.is_ascii_alphabetic() => d.to_ascii_lowercase(),
            _ => return Err(PathError::NotAbsolute(host_path.to_string())),
        };

        let rest: Vec<&str> = host_path[2..]
            .split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .collect();

        let root = if drive == self.passthrough_drive {
            String::new()
        } else {
            format!(
                "{}/drive_{}",
                self.prefix.to_string_lossy().trim_end_matches('/'),
                drive
            )
        };

        if rest.is_empty() {
            return Ok(if root.is_empty() { "/".to_string() } else { root });
        }
        Ok(format!("{}/{}", root, rest.join("/")))
    }

    /// Helper path to host path, always through the passthrough drive.
    ///
    /// `/prefix/drive_c/x` maps to `Z:\prefix\drive_c\x`, which names the
    /// same file as `C:\x`. Relative paths have no host equivalent.
    pub fn to_host(&self, helper_path: &Path) -> Option<String> {
        if !helper_path.is_absolute() {
            return None;
        }

        let parts: Vec<String> = helper_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Some(format!(
            "{}:\\{}",
            self.passthrough_drive.to_ascii_uppercase(),
            parts.join("\\")
        ))
    }
}
