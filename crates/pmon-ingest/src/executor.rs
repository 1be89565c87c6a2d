//! Row-by-row ingestion of an admitted file
//!
//! Every row ends in exactly one [`RowOutcome`]. Corrupt rows, duplicates and
//! rejected inserts are recorded and the loop moves on; only an error that
//! makes the store itself unusable leaves the loop early, and then the
//! transaction is rolled back. All of a file's inserts share one
//! transaction, committed after the last row.

use crate::error::{IngestError, Result};
use crate::reader::{FileReader, RawRow};
use crate::sanitize::{inspect, RowDefect};
use crate::schema::TableSchema;
use crate::store::{SqlValue, Store, StoreError};
use crate::timestamp::{normalize, CanonicalTimestamp};
use pmon_common::DeclaredType;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What happened to one data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RowOutcome {
    Inserted,
    SkippedCorrupt(RowDefect),
    /// The store already holds a row with the same key.
    SkippedDuplicate,
    Failed(String),
}

/// Per-file row tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub total: usize,
    pub inserted: usize,
    pub corrupt: usize,
    pub duplicate: usize,
    pub failed: usize,
}

impl RowCounts {
    pub fn record(&mut self, outcome: &RowOutcome) {
        self.total += 1;
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::SkippedCorrupt(_) => self.corrupt += 1,
            RowOutcome::SkippedDuplicate => self.duplicate += 1,
            RowOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn add(&mut self, other: &RowCounts) {
        self.total += other.total;
        self.inserted += other.inserted;
        self.corrupt += other.corrupt;
        self.duplicate += other.duplicate;
        self.failed += other.failed;
    }
}

/// Per-file result surfaced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionOutcome {
    SkippedAlreadyPresent,
    IngestedFully,
    IngestedWithSkippedCorruptRows,
    Failed,
}

impl IngestionOutcome {
    /// Classify an ingested file from its row tallies.
    pub fn from_counts(counts: &RowCounts) -> Self {
        if counts.failed > 0 && counts.inserted + counts.duplicate == 0 {
            IngestionOutcome::Failed
        } else if counts.corrupt > 0 || counts.failed > 0 {
            IngestionOutcome::IngestedWithSkippedCorruptRows
        } else {
            IngestionOutcome::IngestedFully
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionOutcome::SkippedAlreadyPresent => "skipped_already_present",
            IngestionOutcome::IngestedFully => "ingested_fully",
            IngestionOutcome::IngestedWithSkippedCorruptRows => "ingested_with_skipped_corrupt_rows",
            IngestionOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub outcome: IngestionOutcome,
    pub rows: RowCounts,
}

/// Inserts the rows of admitted files into one table.
pub struct Executor<'a, S: Store> {
    store: &'a S,
    schema: &'a TableSchema,
    reader: FileReader,
}

impl<'a, S: Store> Executor<'a, S> {
    pub fn new(store: &'a S, schema: &'a TableSchema, reader: FileReader) -> Self {
        Self {
            store,
            schema,
            reader,
        }
    }

    /// Read `path` again and insert its rows for station `source`.
    pub fn ingest(&self, source: &str, path: &Path) -> Result<FileSummary> {
        let file = self.reader.read(path)?;
        if file.header.is_empty() {
            return Err(IngestError::NoValidRows(path.to_path_buf()));
        }
        self.schema.check_header(&file.header)?;

        let sql = self.schema.insert_sql(&file.header);

        self.store.begin()?;
        let rows = match self.insert_rows(&sql, source, path, &file.rows) {
            Ok(rows) => rows,
            Err(e) => {
                self.abandon(path);
                return Err(e);
            },
        };
        if let Err(e) = self.store.commit() {
            self.abandon(path);
            return Err(e.into());
        }

        let outcome = IngestionOutcome::from_counts(&rows);
        info!(
            table = %self.schema.name,
            source,
            file = %path.display(),
            outcome = %outcome,
            total = rows.total,
            inserted = rows.inserted,
            corrupt = rows.corrupt,
            duplicate = rows.duplicate,
            failed = rows.failed,
            "Ingested file"
        );

        Ok(FileSummary {
            path: path.to_path_buf(),
            outcome,
            rows,
        })
    }

    fn insert_rows(&self, sql: &str, source: &str, path: &Path, file_rows: &[RawRow]) -> Result<RowCounts> {
        let mut rows = RowCounts::default();
        for row in file_rows {
            let outcome = self.ingest_row(sql, source, row)?;
            match &outcome {
                RowOutcome::Inserted => {},
                RowOutcome::SkippedCorrupt(defect) => warn!(
                    file = %path.display(),
                    line = row.line,
                    content = %row.fields.join(","),
                    reason = %defect,
                    "Skipping corrupt row"
                ),
                RowOutcome::SkippedDuplicate => {
                    debug!(file = %path.display(), line = row.line, "Row already present")
                },
                RowOutcome::Failed(reason) => error!(
                    file = %path.display(),
                    line = row.line,
                    reason = %reason,
                    "Failed to insert row"
                ),
            }
            rows.record(&outcome);
        }
        Ok(rows)
    }

    /// Roll back the file's transaction after a fatal error.
    fn abandon(&self, path: &Path) {
        match self.store.rollback() {
            Ok(()) => warn!(file = %path.display(), "Rolled back file transaction"),
            Err(e) => error!(file = %path.display(), error = %e, "Failed to roll back file transaction"),
        }
    }

    /// `Err` only for failures that must abort the run.
    fn ingest_row(&self, sql: &str, source: &str, row: &RawRow) -> Result<RowOutcome> {
        if let Some(defect) = inspect(&row.fields, self.schema.columns.len()) {
            return Ok(RowOutcome::SkippedCorrupt(defect));
        }

        let params = match self.bind(source, row) {
            Ok(params) => params,
            Err(outcome) => return Ok(outcome),
        };

        match self.store.execute(sql, &params) {
            Ok(_) => Ok(RowOutcome::Inserted),
            Err(StoreError::UniqueViolation(_)) => Ok(RowOutcome::SkippedDuplicate),
            Err(err @ StoreError::Connection(_)) => Err(err.into()),
            Err(err) => Ok(RowOutcome::Failed(err.to_string())),
        }
    }

    /// Typed parameters for one row, station first.
    fn bind(&self, source: &str, row: &RawRow) -> std::result::Result<Vec<SqlValue>, RowOutcome> {
        let mut params = Vec::with_capacity(row.fields.len() + 1);
        params.push(SqlValue::from(source));

        for (column, raw) in self.schema.columns.iter().zip(&row.fields) {
            let value = match column.declared_type {
                DeclaredType::Text => SqlValue::from(raw.as_str()),
                DeclaredType::Timestamp => match normalize(raw) {
                    Ok(ts) => SqlValue::Text(ts.to_string()),
                    Err(_) => {
                        return Err(RowOutcome::SkippedCorrupt(RowDefect::Timestamp {
                            column: column.name.clone(),
                            value: raw.clone(),
                        }))
                    },
                },
                DeclaredType::Integer => match raw.trim() {
                    "" => SqlValue::Null,
                    text => text.parse::<i64>().map(SqlValue::Integer).map_err(|_| {
                        RowOutcome::Failed(format!("column '{}': invalid integer '{}'", column.name, raw))
                    })?,
                },
                DeclaredType::FloatingPoint => match raw.trim() {
                    "" => SqlValue::Null,
                    text => text.parse::<f64>().map(SqlValue::Real).map_err(|_| {
                        RowOutcome::Failed(format!("column '{}': invalid number '{}'", column.name, raw))
                    })?,
                },
            };
            params.push(value);
        }

        Ok(params)
    }
}

/// Summary for a file the admission step judged already present.
pub fn skipped(path: &Path, last_timestamp: CanonicalTimestamp) -> FileSummary {
    debug!(file = %path.display(), %last_timestamp, "File already present");
    FileSummary {
        path: path.to_path_buf(),
        outcome: IngestionOutcome::SkippedAlreadyPresent,
        rows: RowCounts::default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::synthesize;
    use crate::store::{SqliteStore, StoreResult};
    use std::cell::Cell;

    const HEADER: &str = "DateAndTime,LoadName,ShuntVoltage,LoadVoltage,Current,Power\n";

    fn setup() -> (SqliteStore, TableSchema) {
        use DeclaredType::*;
        let header: Vec<String> = HEADER.trim().split(',').map(str::to_string).collect();
        let schema = synthesize(
            "IOBoard1",
            &[Timestamp, Text, FloatingPoint, FloatingPoint, FloatingPoint, FloatingPoint],
            &header,
        )
        .unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(&schema).unwrap();
        (store, schema)
    }

    fn write_file(dir: &tempfile::TempDir, body: &[u8]) -> PathBuf {
        let path = dir.path().join("PowerMonitor-20240103.csv");
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(body);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn row_count(store: &SqliteStore) -> String {
        store
            .query_scalar("SELECT COUNT(*) FROM \"IOBoard1\"", &[])
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_clean_file_is_ingested_fully() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"2024-01-03T00:00:00Z,load-1,0.01,4.98,120.5,600.1\n2024-01-03T00:01:00Z,load-1,0.01,4.97,121.0,601.3\n",
        );

        let summary = Executor::new(&store, &schema, FileReader::default())
            .ingest("station-a", &path)
            .unwrap();

        assert_eq!(summary.outcome, IngestionOutcome::IngestedFully);
        assert_eq!(summary.rows.inserted, 2);
        assert_eq!(row_count(&store), "2");
        assert_eq!(
            store
                .query_scalar("SELECT MAX(\"DateAndTime\") FROM \"IOBoard1\" WHERE station = ?1", &[
                    SqlValue::from("station-a")
                ])
                .unwrap(),
            Some("2024-01-03 00:01:00.000000".to_string())
        );
    }

    #[test]
    fn test_corrupt_rows_are_isolated() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"2024-01-03T00:00:00Z,load-1,0.01,4.98,120.5,600.1\n\
              2024-01-03T00:01:00Z,lo\xffd-1,0.01,4.98,120.5,600.1\n\
              2024-01-03T00:02:00Z,load-1,0.01,4.98,120.5,600.1\n\
              2024-01-03T00:03:00Z,load-1,0.01\n\
              2024-01-03T00:04:00Z,load-1,0.01,4.98,120.5,600.1\n",
        );

        let summary = Executor::new(&store, &schema, FileReader::default())
            .ingest("station-a", &path)
            .unwrap();

        assert_eq!(summary.rows.total, 5);
        assert_eq!(summary.rows.inserted, 3);
        assert_eq!(summary.rows.corrupt, 2);
        assert_eq!(summary.outcome, IngestionOutcome::IngestedWithSkippedCorruptRows);
        assert_eq!(row_count(&store), "3");
    }

    #[test]
    fn test_bad_timestamp_on_data_row_counts_as_corrupt() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"garbage,load-1,0.01,4.98,120.5,600.1\n2024-01-03T00:04:00Z,load-1,0.01,4.98,120.5,600.1\n",
        );

        let summary = Executor::new(&store, &schema, FileReader::default())
            .ingest("station-a", &path)
            .unwrap();
        assert_eq!(summary.rows.corrupt, 1);
        assert_eq!(summary.rows.inserted, 1);
    }

    #[test]
    fn test_reingest_swallows_duplicates() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"2024-01-03T00:00:00Z,load-1,0.01,4.98,120.5,600.1\n2024-01-03T00:00:00Z,load-2,0.02,4.90,99.0,480.0\n",
        );
        let executor = Executor::new(&store, &schema, FileReader::default());

        executor.ingest("station-a", &path).unwrap();
        let again = executor.ingest("station-a", &path).unwrap();

        assert_eq!(again.rows.duplicate, 2);
        assert_eq!(again.rows.inserted, 0);
        assert_eq!(again.outcome, IngestionOutcome::IngestedFully);
        assert_eq!(row_count(&store), "2");

        // Same keys under another station are distinct rows.
        executor.ingest("station-b", &path).unwrap();
        assert_eq!(row_count(&store), "4");
    }

    #[test]
    fn test_numeric_binding() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"2024-01-03T00:00:00Z,load-1,,4.98,120.5,600.1\n2024-01-03T00:01:00Z,load-1,abc,4.98,120.5,600.1\n",
        );

        let summary = Executor::new(&store, &schema, FileReader::default())
            .ingest("station-a", &path)
            .unwrap();

        assert_eq!(summary.rows.inserted, 1);
        assert_eq!(summary.rows.failed, 1);
        assert_eq!(summary.outcome, IngestionOutcome::IngestedWithSkippedCorruptRows);
        assert_eq!(
            store
                .query_scalar("SELECT COUNT(*) FROM \"IOBoard1\" WHERE \"ShuntVoltage\" IS NULL", &[])
                .unwrap(),
            Some("1".to_string())
        );
    }

    #[test]
    fn test_header_mismatch_is_fatal() {
        let (store, schema) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "DateAndTime,LoadName,ShuntVoltage,LoadVoltage\n2024-01-03,a,1,2\n").unwrap();

        let err = Executor::new(&store, &schema, FileReader::default())
            .ingest("station-a", &path)
            .unwrap_err();
        assert!(matches!(err, IngestError::ConfigMismatch { .. }));
        assert_eq!(row_count(&store), "0");
    }

    /// Loses the connection on one chosen insert, then behaves.
    struct FlakyStore {
        inner: SqliteStore,
        executes: Cell<usize>,
        fail_on: usize,
    }

    impl Store for FlakyStore {
        fn table_exists(&self, table: &str) -> StoreResult<bool> {
            self.inner.table_exists(table)
        }
        fn create_table(&self, schema: &TableSchema) -> StoreResult<()> {
            self.inner.create_table(schema)
        }
        fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> StoreResult<Option<String>> {
            self.inner.query_scalar(sql, params)
        }
        fn execute(&self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
            let n = self.executes.get();
            self.executes.set(n + 1);
            if n == self.fail_on {
                return Err(StoreError::Connection("connection reset".to_string()));
            }
            self.inner.execute(sql, params)
        }
        fn begin(&self) -> StoreResult<()> {
            self.inner.begin()
        }
        fn commit(&self) -> StoreResult<()> {
            self.inner.commit()
        }
        fn rollback(&self) -> StoreResult<()> {
            self.inner.rollback()
        }
    }

    #[test]
    fn test_connection_loss_rolls_back_file() {
        let (inner, schema) = setup();
        let store = FlakyStore {
            inner,
            executes: Cell::new(0),
            fail_on: 1,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            b"2024-01-03T00:00:00Z,load-1,0.01,4.98,120.5,600.1\n2024-01-03T00:01:00Z,load-1,0.01,4.97,121.0,601.3\n",
        );
        let executor = Executor::new(&store, &schema, FileReader::default());

        let err = executor.ingest("station-a", &path).unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");
        // The first row was inserted before the failure and is gone again.
        assert_eq!(row_count(&store.inner), "0");

        // No transaction is left open, so the next attempt starts cleanly.
        let summary = executor.ingest("station-a", &path).unwrap();
        assert_eq!(summary.rows.inserted, 2);
        assert_eq!(row_count(&store.inner), "2");
    }

    #[test]
    fn test_outcome_from_counts() {
        let counts = |inserted, corrupt, duplicate, failed| RowCounts {
            total: inserted + corrupt + duplicate + failed,
            inserted,
            corrupt,
            duplicate,
            failed,
        };

        assert_eq!(IngestionOutcome::from_counts(&counts(3, 0, 1, 0)), IngestionOutcome::IngestedFully);
        assert_eq!(
            IngestionOutcome::from_counts(&counts(3, 1, 0, 0)),
            IngestionOutcome::IngestedWithSkippedCorruptRows
        );
        assert_eq!(IngestionOutcome::from_counts(&counts(0, 1, 0, 2)), IngestionOutcome::Failed);
    }
}
