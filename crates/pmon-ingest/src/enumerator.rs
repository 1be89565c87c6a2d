//! Station discovery
//!
//! Each immediate subdirectory of a table's root is one station. A root that
//! has no station subdirectories is itself the only station, named after its
//! own basename. Files inside a station are processed in file name order,
//! since loggers put the date in the name.

use crate::config::ScanConfig;
use crate::error::Result;
use pmon_common::PmonError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;
use walkdir::WalkDir;

/// One station directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalSource {
    /// Identity stored in every row loaded from this directory.
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceEnumerator {
    reserved_dir: String,
    extension: Option<String>,
    min_file_age: Duration,
}

impl From<&ScanConfig> for SourceEnumerator {
    fn from(scan: &ScanConfig) -> Self {
        Self {
            reserved_dir: scan.reserved_dir.clone(),
            extension: scan
                .extension
                .as_deref()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty()),
            min_file_age: Duration::from_secs(scan.min_file_age_secs),
        }
    }
}

impl SourceEnumerator {
    /// Stations under `root`, sorted by name.
    pub fn discover_sources(&self, root: &Path) -> Result<Vec<LogicalSource>> {
        if !root.is_dir() {
            return Err(PmonError::config(format!(
                "table root '{}' is not a directory",
                root.display()
            ))
            .into());
        }

        let mut sources = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy();
            if !entry.path().is_dir() || is_hidden(&name) {
                continue;
            }
            if name == self.reserved_dir.as_str() {
                debug!(dir = %entry.path().display(), "Skipping reserved directory");
                continue;
            }
            sources.push(LogicalSource {
                name: name.into_owned(),
                dir: entry.path().to_path_buf(),
            });
        }

        if sources.is_empty() {
            let resolved = std::fs::canonicalize(root).map_err(PmonError::from)?;
            let name = resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    PmonError::config(format!("cannot name a station after '{}'", root.display()))
                })?;
            debug!(root = %root.display(), source = %name, "No station subdirectories, using root");
            sources.push(LogicalSource {
                name,
                dir: root.to_path_buf(),
            });
        }

        Ok(sources)
    }

    /// Files of `source` eligible for this run, in name order.
    pub fn candidate_files(&self, source: &LogicalSource, now: SystemTime) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&source.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || is_hidden(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if !self.extension_matches(path) {
                continue;
            }
            if !self.old_enough(path, now) {
                debug!(file = %path.display(), "Skipping file modified too recently");
                continue;
            }
            files.push(path.to_path_buf());
        }
        Ok(files)
    }

    fn extension_matches(&self, path: &Path) -> bool {
        match &self.extension {
            None => true,
            Some(wanted) => path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase() == *wanted)
                .unwrap_or(false),
        }
    }

    fn old_enough(&self, path: &Path, now: SystemTime) -> bool {
        if self.min_file_age.is_zero() {
            return true;
        }
        match std::fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => now
                .duration_since(modified)
                .map(|age| age >= self.min_file_age)
                .unwrap_or(false),
            Err(_) => true,
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
