//! Log-file preparation.
//!
//! The `tracing-subscriber` setup lives in the binary; this module only
//! decides where the log goes and keeps the file from growing unbounded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PlatformError;

/// Rotate once the active log exceeds this many bytes (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated files kept next to the active log.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// File name of the active log.
pub const LOG_FILE_NAME: &str = "droidbridge.log";

/// Where and how large the log file may grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileSettings {
    pub dir: PathBuf,
    pub max_size: u64,
    pub max_files: u32,
}

impl LogFileSettings {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    /// Create the log directory, rotate an oversized log, and return the path
    /// the subscriber should append to.
    pub fn prepare(&self) -> Result<PathBuf, PlatformError> {
        fs::create_dir_all(&self.dir).map_err(|source| PlatformError::Prepare {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.log_path();
        rotate(&path, self.max_size, self.max_files).map_err(|source| {
            PlatformError::Prepare {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }
}

/// Normalize a configured level name into an `EnvFilter` directive.
/// Unknown names fall back to `info`.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

// `x.log` -> `x.log.1` -> ... -> `x.log.<max_files>` (dropped)
fn rotate(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let len = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if len < max_size {
        return Ok(());
    }

    let oldest = numbered(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = numbered(log_path, i);
        if from.exists() {
            fs::rename(&from, numbered(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, numbered(log_path, 1))
}

fn numbered(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
