//! Run configuration (pmon.yml)
//!
//! The manifest names the database, how station directories are scanned,
//! and for every table its root directory and ordered column types:
//!
//! ```yaml
//! database:
//!   path: data/PMonData.sqlite3
//! scan:
//!   reserved_dir: logs
//!   extension: csv
//!   delimiter: ","
//!   min_file_age_secs: 86400
//! tables:
//!   - name: IOBoard1
//!     root: /srv/pmon/IOBoard1
//!     columns: [timestamp, text, float, float, float, float]
//! ```
//!
//! Relative paths are resolved against the manifest's own directory.
//! `PMON_DATABASE_PATH`, `PMON_MIN_FILE_AGE_SECS` and `PMON_RESERVED_DIR`
//! override the file.

use crate::error::Result;
use pmon_common::logging::DEFAULT_LOG_DIR_NAME;
use pmon_common::{DeclaredType, PmonError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest looked up in the working directory when none is given.
pub const DEFAULT_MANIFEST_FILE: &str = "pmon.yml";

pub const DEFAULT_DATABASE_PATH: &str = "data/PMonData.sqlite3";

pub const DEFAULT_EXTENSION: &str = "csv";

pub const DEFAULT_DELIMITER: &str = ",";

/// Files younger than this are still being written by the logger.
pub const DEFAULT_MIN_FILE_AGE_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    /// Subdirectory name that is never a station
    #[serde(default = "default_reserved_dir")]
    pub reserved_dir: String,
    /// Only files with this extension are candidates; `None` takes every file
    #[serde(default = "default_extension")]
    pub extension: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// 0 disables the age check
    #[serde(default = "default_min_file_age_secs")]
    pub min_file_age_secs: u64,
}

/// One target table and where its files live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    pub name: String,
    pub root: PathBuf,
    pub columns: Vec<DeclaredType>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_reserved_dir() -> String {
    DEFAULT_LOG_DIR_NAME.to_string()
}

fn default_extension() -> Option<String> {
    Some(DEFAULT_EXTENSION.to_string())
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_min_file_age_secs() -> u64 {
    DEFAULT_MIN_FILE_AGE_SECS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            reserved_dir: default_reserved_dir(),
            extension: default_extension(),
            delimiter: default_delimiter(),
            min_file_age_secs: default_min_file_age_secs(),
        }
    }
}

impl ScanConfig {
    /// The delimiter as the single byte the CSV parser wants.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_str() {
            "\\t" | "tab" => Ok(b'\t'),
            d if d.len() == 1 && d.is_ascii() => Ok(d.as_bytes()[0]),
            d => Err(PmonError::config(format!(
                "scan.delimiter must be a single ASCII character, got '{}'",
                d
            ))
            .into()),
        }
    }
}

impl IngestConfig {
    /// Load the manifest at `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        dotenvy::dotenv().ok();

        if !path.exists() {
            return Err(PmonError::config(format!("manifest not found: {}", path.display())).into());
        }
        let content = std::fs::read_to_string(path).map_err(PmonError::from)?;

        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse manifest text without touching the environment.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| PmonError::config(format!("Failed to parse manifest YAML: {}", e)).into())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.clone()
            }
        };
        self.database.path = resolve(&self.database.path);
        for table in &mut self.tables {
            table.root = resolve(&table.root);
        }
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PMON_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("PMON_RESERVED_DIR") {
            self.scan.reserved_dir = dir;
        }
        if let Ok(secs) = std::env::var("PMON_MIN_FILE_AGE_SECS") {
            self.scan.min_file_age_secs = secs.trim().parse().map_err(|_| {
                PmonError::config(format!(
                    "PMON_MIN_FILE_AGE_SECS must be a whole number of seconds, got '{}'",
                    secs
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(PmonError::config("database.path cannot be empty").into());
        }
        if self.scan.reserved_dir.trim().is_empty() {
            return Err(PmonError::config("scan.reserved_dir cannot be empty").into());
        }
        self.scan.delimiter_byte()?;

        if self.tables.is_empty() {
            return Err(PmonError::config("at least one table must be configured").into());
        }
        for (i, table) in self.tables.iter().enumerate() {
            if table.name.trim().is_empty() {
                return Err(PmonError::config(format!("tables[{}].name cannot be empty", i)).into());
            }
            if table.root.as_os_str().is_empty() {
                return Err(PmonError::config(format!("table '{}' has no root", table.name)).into());
            }
            if table.columns.is_empty() {
                return Err(
                    PmonError::config(format!("table '{}' declares no columns", table.name)).into()
                );
            }
            if self.tables[..i].iter().any(|other| other.name == table.name) {
                return Err(
                    PmonError::config(format!("table '{}' is configured twice", table.name)).into()
                );
            }
        }
        Ok(())
    }
}
