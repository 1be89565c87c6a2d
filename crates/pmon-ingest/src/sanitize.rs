//! Corrupt row detection
//!
//! The reader decodes files lossily, so every byte sequence that is not
//! valid UTF-8 arrives here as [`CORRUPTION_MARKER`]. Loggers that lose
//! power mid-write also leave NUL runs behind, which are treated the same.

use serde::Serialize;
use std::fmt;

/// Character substituted for unreadable bytes at read time (U+FFFD).
pub const CORRUPTION_MARKER: char = char::REPLACEMENT_CHARACTER;

/// Why a row was refused before it reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDefect {
    /// A marker or NUL appears somewhere in the row.
    Marker,
    /// The row does not have one field per header column.
    FieldCount { expected: usize, found: usize },
    /// A timestamp-typed field could not be canonicalized.
    Timestamp { column: String, value: String },
}

impl fmt::Display for RowDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowDefect::Marker => f.write_str("contains unreadable bytes"),
            RowDefect::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            },
            RowDefect::Timestamp { column, value } => {
                write!(f, "unparseable timestamp '{}' in column '{}'", value, column)
            },
        }
    }
}

/// True when any field carries the corruption marker or a NUL.
pub fn is_corrupt<S: AsRef<str>>(fields: &[S]) -> bool {
    fields
        .iter()
        .any(|field| field.as_ref().contains(|c: char| c == CORRUPTION_MARKER || c == '\0'))
}

/// Structural check applied before a row is used for anything.
pub fn inspect<S: AsRef<str>>(fields: &[S], expected_len: usize) -> Option<RowDefect> {
    if is_corrupt(fields) {
        return Some(RowDefect::Marker);
    }
    if fields.len() != expected_len {
        return Some(RowDefect::FieldCount {
            expected: expected_len,
            found: fields.len(),
        });
    }
    None
}
