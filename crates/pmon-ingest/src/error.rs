//! Error types for the ingestion engine
//!
//! Every failure is classified once, here, as either fatal for the run or
//! local to one file. Row-level problems never become an `IngestError`; they
//! are recorded as [`crate::executor::RowOutcome`]s instead.

use crate::store::StoreError;
use crate::timestamp::TimestampParseError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The type manifest does not describe the files found on disk.
    #[error("Manifest mismatch for table '{table}': {reason}. Fix the table's column list in the manifest.")]
    ConfigMismatch { table: String, reason: String },

    /// A timestamp that decides what to load could not be parsed.
    #[error("Invalid timestamp in {context}: {source}")]
    TimestampParse {
        context: String,
        #[source]
        source: TimestampParseError,
    },

    #[error("Failed to create table '{table}': {source}")]
    SchemaCreation {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Nothing in the file survived sanitization, so no admission decision exists.
    #[error("No valid rows in '{}'", .0.display())]
    NoValidRows(PathBuf),

    #[error("Failed to read '{}': {reason}", path.display())]
    FileRead { path: PathBuf, reason: String },

    #[error("Failed to scan directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Common(#[from] pmon_common::PmonError),
}

impl IngestError {
    /// Create a manifest mismatch error
    pub fn config_mismatch(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// File-local errors mark that file as failed and the run moves on to
    /// the next file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::NoValidRows(_) | IngestError::FileRead { .. })
    }
}
