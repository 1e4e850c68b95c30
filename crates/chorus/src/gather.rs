//! Filesystem context gathering using the `ignore` crate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use coordination::{ContextFile, ContextGatherer, GatherError, GatheredContext};
use ignore::WalkBuilder;
use serde::Deserialize;
use tracing::{debug, warn};

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Extension and name filters applied to walked files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatherFilters {
    /// Only keep files with one of these extensions (empty keeps all).
    pub include: Vec<String>,
    /// Drop files with one of these extensions.
    pub exclude: Vec<String>,
    /// Drop files and directories with one of these names.
    pub exclude_names: Vec<String>,
}

impl GatherFilters {
    fn normalized(exts: &[String]) -> Vec<String> {
        exts.iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let include = Self::normalized(&self.include);
        let exclude = Self::normalized(&self.exclude);
        if !include.is_empty() && !include.contains(&ext) {
            return false;
        }
        !exclude.contains(&ext)
    }

    fn excludes_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.exclude_names.iter().any(|x| x == name))
    }
}

/// Walks the given paths, honouring `.gitignore`, skipping hidden entries
/// and binary files.
#[derive(Debug, Clone, Default)]
pub struct FsContextGatherer {
    filters: GatherFilters,
}

impl FsContextGatherer {
    pub fn new(filters: GatherFilters) -> Self {
        Self { filters }
    }

    /// Synchronous walk; `gather` runs this on the blocking pool.
    pub fn gather_blocking(&self, paths: &[PathBuf]) -> Result<GatheredContext, GatherError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut skipped = 0;

        for root in paths {
            if !root.exists() {
                return Err(GatherError::NotFound(root.clone()));
            }

            if root.is_file() {
                // Explicitly named files bypass the extension filters.
                if seen.insert(root.clone()) {
                    match read_text(root)? {
                        Some(content) => files.push(ContextFile {
                            path: root.clone(),
                            content,
                        }),
                        None => skipped += 1,
                    }
                }
                continue;
            }

            let filters = self.filters.clone();
            let walker = WalkBuilder::new(root)
                .hidden(true)
                .git_ignore(true)
                .require_git(false)
                .filter_entry(move |entry| !filters.excludes_name(entry.path()))
                .sort_by_file_path(|a, b| a.cmp(b))
                .build();

            for entry in walker {
                let entry = entry.map_err(|e| GatherError::Walk(e.to_string()))?;
                let path = entry.path();
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                if !self.filters.accepts_extension(path) {
                    skipped += 1;
                    continue;
                }
                if !seen.insert(path.to_path_buf()) {
                    continue;
                }
                match read_text(path)? {
                    Some(content) => files.push(ContextFile {
                        path: path.to_path_buf(),
                        content,
                    }),
                    None => {
                        debug!(path = %path.display(), "skipping binary file");
                        skipped += 1;
                    }
                }
            }
        }

        Ok(GatheredContext::from_files(files, skipped))
    }
}

#[async_trait]
impl ContextGatherer for FsContextGatherer {
    async fn gather(&self, paths: &[PathBuf]) -> Result<GatheredContext, GatherError> {
        let gatherer = self.clone();
        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || gatherer.gather_blocking(&paths))
            .await
            .map_err(|e| {
                warn!(error = %e, "context walk task failed");
                GatherError::Walk(e.to_string())
            })?
    }
}

/// File contents as text, or `None` for binary files.
fn read_text(path: &Path) -> Result<Option<String>, GatherError> {
    let bytes = std::fs::read(path).map_err(|source| GatherError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
