//! Per-station dedup frontier
//!
//! The watermark is re-derived from the table on every run and never cached
//! across runs. Within one run it is read once per station, before that
//! station's first file, and is not advanced as files are ingested.

use crate::error::{IngestError, Result};
use crate::schema::TableSchema;
use crate::store::{SqlValue, Store};
use crate::timestamp::{normalize, CanonicalTimestamp};
use tracing::debug;

/// Latest stored temporal key for `source`, or epoch zero when the station
/// has no rows yet.
pub fn latest_timestamp<S: Store>(
    store: &S,
    schema: &TableSchema,
    source: &str,
) -> Result<CanonicalTimestamp> {
    let stored = store.query_scalar(&schema.latest_timestamp_sql(), &[SqlValue::from(source)])?;

    let watermark = match stored {
        None => CanonicalTimestamp::epoch(),
        Some(text) => normalize(&text).map_err(|source_err| IngestError::TimestampParse {
            context: format!("watermark of '{}' in table '{}'", source, schema.name),
            source: source_err,
        })?,
    };

    debug!(table = %schema.name, source, %watermark, "Computed watermark");
    Ok(watermark)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::synthesize;
    use crate::store::SqliteStore;
    use pmon_common::DeclaredType;

    fn setup() -> (SqliteStore, TableSchema) {
        let store = SqliteStore::open_in_memory().unwrap();
        let header = vec!["ts".to_string(), "name".to_string()];
        let schema =
            synthesize("t", &[DeclaredType::Timestamp, DeclaredType::Text], &header).unwrap();
        store.create_table(&schema).unwrap();
        (store, schema)
    }

    fn insert(store: &SqliteStore, schema: &TableSchema, station: &str, ts: &str) {
        let header = vec!["ts".to_string(), "name".to_string()];
        store
            .execute(
                &schema.insert_sql(&header),
                &[SqlValue::from(station), SqlValue::from(ts), SqlValue::from("load-1")],
            )
            .unwrap();
    }

    #[test]
    fn test_fresh_station_is_epoch() {
        let (store, schema) = setup();
        assert!(latest_timestamp(&store, &schema, "station-a").unwrap().is_epoch());
    }

    #[test]
    fn test_max_is_scoped_to_station() {
        let (store, schema) = setup();
        insert(&store, &schema, "station-a", "2024-01-01 00:00:00.000000");
        insert(&store, &schema, "station-a", "2024-01-02 00:00:00.000000");
        insert(&store, &schema, "station-b", "2024-02-01 00:00:00.000000");

        let watermark = latest_timestamp(&store, &schema, "station-a").unwrap();
        assert_eq!(watermark.to_string(), "2024-01-02 00:00:00.000000");
    }

    #[test]
    fn test_unparseable_stored_value_is_fatal() {
        let (store, schema) = setup();
        insert(&store, &schema, "station-a", "not a time");

        let err = latest_timestamp(&store, &schema, "station-a").unwrap_err();
        assert!(matches!(err, IngestError::TimestampParse { .. }));
        assert!(err.is_fatal());
    }
}
