//! JSONL audit log.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use coordination::{AuditLogger, AuditRecord};
use tracing::warn;

/// Appends one JSON object per record to a file.
///
/// Failures are logged and swallowed; auditing never changes a run.
#[derive(Debug)]
pub struct JsonlAuditLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlAuditLogger {
    /// Open (or create) `path` for appending. A file that cannot be opened
    /// is reported once and every later record is dropped.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "Failed to create audit log directory: {e}");
            }
        }
        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), "Failed to open audit log: {e}");
                None
            }
        };
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLogger for JsonlAuditLogger {
    fn record(&self, record: AuditRecord) {
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize audit record: {e}");
                return;
            }
        };
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{json}") {
                warn!(path = %self.path.display(), "Failed to append audit record: {e}");
            }
        }
    }
}
