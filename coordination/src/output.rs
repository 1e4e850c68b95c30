//! Output persistence seam.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persists one document per outcome. `name` is the file stem to use
/// (already unique within the run); returns where it was written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, WriteError>;
}
