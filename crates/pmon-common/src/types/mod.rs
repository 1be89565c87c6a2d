//! Common types used across PMon

use crate::error::PmonError;
use serde::{Deserialize, Serialize};

/// Storage type declared for one column of a type manifest.
///
/// Manifests are written by operators who are used to SQL spellings, so
/// parsing accepts the common aliases (`varchar`, `double`, `datetime`, ...)
/// while serialisation always emits the canonical lowercase name.
///
/// # Examples
///
/// ```
/// use pmon_common::types::DeclaredType;
///
/// let ty: DeclaredType = "DATETIME".parse().unwrap();
/// assert_eq!(ty, DeclaredType::Timestamp);
/// assert_eq!(ty.sql_type(), "TEXT");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum DeclaredType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "float")]
    FloatingPoint,
    #[serde(rename = "timestamp")]
    Timestamp,
}

impl DeclaredType {
    /// Canonical manifest spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredType::Text => "text",
            DeclaredType::Integer => "integer",
            DeclaredType::FloatingPoint => "float",
            DeclaredType::Timestamp => "timestamp",
        }
    }

    /// Column type used in the target table.
    ///
    /// Timestamps are stored as canonical text (`YYYY-MM-DD HH:MM:SS.ffffff`),
    /// which sorts and compares correctly as a string.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DeclaredType::Text => "TEXT",
            DeclaredType::Integer => "INTEGER",
            DeclaredType::FloatingPoint => "REAL",
            DeclaredType::Timestamp => "TEXT",
        }
    }
}

impl std::str::FromStr for DeclaredType {
    type Err = PmonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "string" | "char" | "varchar" => Ok(DeclaredType::Text),
            "integer" | "int" | "bigint" => Ok(DeclaredType::Integer),
            "float" | "floatingpoint" | "real" | "double" | "decimal" => {
                Ok(DeclaredType::FloatingPoint)
            },
            "timestamp" | "datetime" | "date" => Ok(DeclaredType::Timestamp),
            other => Err(PmonError::UnknownColumnType(other.to_string())),
        }
    }
}

impl TryFrom<String> for DeclaredType {
    type Error = PmonError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
