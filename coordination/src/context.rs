//! Context-gathering seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to produce the context set.
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("context path not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walk error: {0}")]
    Walk(String),
}

/// One file included in the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: PathBuf,
    pub content: String,
}

/// Totals reported for dry runs and summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub lines: usize,
    pub chars: usize,
    pub estimated_tokens: usize,
}

impl ContextStats {
    /// Rough token estimate: one token per four characters, rounded up.
    pub fn estimate_tokens(chars: usize) -> usize {
        chars.div_ceil(4)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatheredContext {
    pub files: Vec<ContextFile>,
    pub stats: ContextStats,
}

impl GatheredContext {
    /// Build a context from files, computing stats. `skipped` is carried
    /// through from the gatherer.
    pub fn from_files(files: Vec<ContextFile>, skipped: usize) -> Self {
        let chars: usize = files.iter().map(|f| f.content.chars().count()).sum();
        let lines: usize = files.iter().map(|f| f.content.lines().count()).sum();
        let stats = ContextStats {
            files_processed: files.len(),
            files_skipped: skipped,
            lines,
            chars,
            estimated_tokens: ContextStats::estimate_tokens(chars),
        };
        Self { files, stats }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }
}

/// Produces the file/content set that prompts are built from. Invoked once
/// per run.
#[async_trait]
pub trait ContextGatherer: Send + Sync {
    async fn gather(&self, paths: &[PathBuf]) -> Result<GatheredContext, GatherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_computed_from_files() {
        let ctx = GatheredContext::from_files(
            vec![
                ContextFile {
                    path: "a.rs".into(),
                    content: "fn a() {}\nfn b() {}\n".into(),
                },
                ContextFile {
                    path: "b.md".into(),
                    content: "hello".into(),
                },
            ],
            3,
        );
        assert_eq!(ctx.stats.files_processed, 2);
        assert_eq!(ctx.stats.files_skipped, 3);
        assert_eq!(ctx.stats.lines, 3);
        assert_eq!(ctx.stats.chars, 25);
        assert_eq!(ctx.stats.estimated_tokens, 7);
    }
}
