//! File-granularity admission
//!
//! Only the last structurally valid row of a file is looked at. If its
//! timestamp is not past the station's watermark the whole file is taken to
//! be in the store already. Files that were partly loaded by an interrupted
//! run are caught by the table's uniqueness constraint instead.

use crate::error::{IngestError, Result};
use crate::reader::{DatasetFile, RawRow};
use crate::sanitize::inspect;
use crate::schema::TableSchema;
use crate::timestamp::{normalize, CanonicalTimestamp};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    /// The file ends after the watermark; ingest all of it.
    Admit { last_timestamp: CanonicalTimestamp },
    /// The file ends at or before the watermark.
    Skip { last_timestamp: CanonicalTimestamp },
}

impl Admission {
    pub fn is_admit(&self) -> bool {
        matches!(self, Admission::Admit { .. })
    }

    pub fn last_timestamp(&self) -> CanonicalTimestamp {
        match self {
            Admission::Admit { last_timestamp } | Admission::Skip { last_timestamp } => {
                *last_timestamp
            },
        }
    }
}

/// Last row of `file` that passes the structural checks.
pub fn last_valid_row<'a>(file: &'a DatasetFile, schema: &TableSchema) -> Option<&'a RawRow> {
    file.rows
        .iter()
        .rev()
        .find(|row| inspect(&row.fields, schema.columns.len()).is_none())
}

/// Decide whether `file` needs ingesting given the station's watermark.
pub fn decide(
    file: &DatasetFile,
    schema: &TableSchema,
    watermark: CanonicalTimestamp,
) -> Result<Admission> {
    let row = last_valid_row(file, schema).ok_or_else(|| IngestError::NoValidRows(file.path.clone()))?;
    let raw = &row.fields[schema.keys.temporal];

    let last_timestamp = normalize(raw).map_err(|source| IngestError::TimestampParse {
        context: format!("{} line {}", file.path.display(), row.line),
        source,
    })?;

    Ok(if last_timestamp > watermark {
        Admission::Admit { last_timestamp }
    } else {
        Admission::Skip { last_timestamp }
    })
}
