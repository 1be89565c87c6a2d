//! Timestamp canonicalization
//!
//! Loggers in the field write ISO-8601-ish timestamps in several shapes:
//! `T` or space separated, with or without fractional seconds, suffixed with
//! `Z`, with a numeric offset, or with no offset at all. Everything is folded
//! into one UTC form with microsecond precision and no offset:
//!
//! ```text
//! 2024-03-05T10:00:00-05:00  ->  2024-03-05 15:00:00.000000
//! 2024-03-05T15:00:00Z       ->  2024-03-05 15:00:00.000000
//! 2024-03-05 15:00:00.5      ->  2024-03-05 15:00:00.500000
//! ```
//!
//! The canonical text is fixed-width, so lexical order equals chronological
//! order. The store relies on that when it computes `MAX()` over the column.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Output layout of [`CanonicalTimestamp`]'s `Display`.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// The text could not be read as a timestamp in any supported layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized timestamp '{input}'")]
pub struct TimestampParseError {
    pub input: String,
}

/// A UTC instant truncated to microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalTimestamp(NaiveDateTime);

impl CanonicalTimestamp {
    /// The "epoch zero" watermark of a station with no stored rows.
    pub fn epoch() -> Self {
        Self(NaiveDateTime::default())
    }

    pub fn is_epoch(&self) -> bool {
        *self == Self::epoch()
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    fn from_naive_utc(naive: NaiveDateTime) -> Self {
        let micros = naive.nanosecond() / 1_000 * 1_000;
        Self(naive.with_nanosecond(micros).unwrap_or(naive))
    }
}

impl fmt::Display for CanonicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl Serialize for CanonicalTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for CanonicalTimestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Parse any supported timestamp encoding into its canonical UTC form.
///
/// A trailing `Z` is rewritten to `+00:00` first; text without an offset is
/// taken to already be UTC.
pub fn normalize(raw: &str) -> Result<CanonicalTimestamp, TimestampParseError> {
    let trimmed = raw.trim();
    let text = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => trimmed.to_string(),
    };

    for format in OFFSET_FORMATS {
        if let Ok(aware) = DateTime::parse_from_str(&text, format) {
            return Ok(CanonicalTimestamp::from_naive_utc(
                aware.with_timezone(&Utc).naive_utc(),
            ));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Ok(CanonicalTimestamp::from_naive_utc(naive));
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(CanonicalTimestamp(midnight));
    }

    Err(TimestampParseError {
        input: raw.to_string(),
    })
}
