//! Delimited file reader
//!
//! Files are decoded lossily: bytes that are not valid UTF-8 become
//! [`crate::sanitize::CORRUPTION_MARKER`] before the CSV parser sees them,
//! so a damaged line is reported as a corrupt row instead of failing the
//! whole file. Rows may have any number of fields; structural checks are the
//! sanitizer's job.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

const BYTE_ORDER_MARK: char = '\u{feff}';

/// One data line, position-aligned with the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file
    pub line: u64,
    pub fields: Vec<String>,
}

/// A file read fully into memory.
#[derive(Debug, Clone)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    /// Trimmed column names; empty for an empty file.
    pub header: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Reads delimited text files with a header line.
#[derive(Debug, Clone, Copy)]
pub struct FileReader {
    delimiter: u8,
}

impl Default for FileReader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl FileReader {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Read the header and every row of `path`.
    pub fn read(&self, path: &Path) -> Result<DatasetFile> {
        let bytes = std::fs::read(path).map_err(|e| IngestError::file_read(path, e))?;
        let last_modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let text = String::from_utf8_lossy(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let header = reader
            .headers()
            .map_err(|e| IngestError::file_read(path, e))?
            .iter()
            .map(clean_header_name)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| IngestError::file_read(path, e))?;
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            rows.push(RawRow {
                line,
                fields: record.iter().map(str::to_string).collect(),
            });
        }

        Ok(DatasetFile {
            path: path.to_path_buf(),
            last_modified,
            header,
            rows,
        })
    }
}

fn clean_header_name(name: &str) -> String {
    name.trim_start_matches(BYTE_ORDER_MARK).trim().to_string()
}
