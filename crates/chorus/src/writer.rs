//! Markdown output files, one per outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordination::{OutputWriter, WriteError};

/// Replace every character outside `[A-Za-z0-9._-]` with `-`.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "output".to_string()
    } else {
        sanitized
    }
}

/// Default output directory name for a run started at `now`.
pub fn default_output_dir(now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("chorus-output-{}", now.format("%Y%m%d-%H%M%S")))
}

/// Writes `<dir>/<sanitized name>.md`, creating `dir` on first use.
#[derive(Debug, Clone)]
pub struct FsOutputWriter {
    dir: PathBuf,
}

impl FsOutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.md", sanitize_name(name)))
    }
}

#[async_trait]
impl OutputWriter for FsOutputWriter {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, WriteError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| WriteError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn sanitizes_model_names() {
        assert_eq!(sanitize_name("gpt-4o"), "gpt-4o");
        assert_eq!(sanitize_name("anthropic/claude-3.5:beta"), "anthropic-claude-3.5-beta");
        assert_eq!(sanitize_name("gemini 2.5 pro"), "gemini-2.5-pro");
        assert_eq!(sanitize_name("x.error"), "x.error");
        assert_eq!(sanitize_name(".."), "output");
    }

    #[test]
    fn default_dir_uses_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            default_output_dir(at),
            PathBuf::from("chorus-output-20260304-050607")
        );
    }
}
