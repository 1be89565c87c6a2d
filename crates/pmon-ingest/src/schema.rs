//! Table schema synthesis
//!
//! A table's shape is data: column names come from a sample file header,
//! column types from the manifest, and the uniqueness key is picked by
//! scanning the declared types in order. [`synthesize`] is a pure function;
//! [`SchemaRegistry::ensure_table`] is the only place that touches the store.
//!
//! Every table starts with two administrative columns:
//!
//! | column     | purpose                                         |
//! |------------|-------------------------------------------------|
//! | `id`       | surrogate row id, lookup only, never in the key |
//! | `station`  | logical source (directory name) of the row      |

use crate::error::{IngestError, Result};
use crate::store::Store;
use pmon_common::DeclaredType;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Surrogate numeric id column.
pub const SURROGATE_COLUMN: &str = "id";

/// Logical source identity column.
pub const SOURCE_COLUMN: &str = "station";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub declared_type: DeclaredType,
}

/// Positions (into [`TableSchema::columns`]) of the manifest columns that
/// make up the uniqueness key alongside [`SOURCE_COLUMN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeySelection {
    /// First timestamp-typed column.
    pub temporal: usize,
    /// First text-typed column, or the last column when there is none.
    pub identity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub keys: KeySelection,
}

/// Pick the key columns from the declared types.
///
/// Returns `None` when no column is timestamp-typed.
pub fn select_keys(columns: &[ColumnSpec]) -> Option<KeySelection> {
    let (first_timestamp, first_text) =
        columns
            .iter()
            .enumerate()
            .fold((None, None), |(timestamp, text), (index, column)| {
                match column.declared_type {
                    DeclaredType::Timestamp => (timestamp.or(Some(index)), text),
                    DeclaredType::Text => (timestamp, text.or(Some(index))),
                    _ => (timestamp, text),
                }
            });

    Some(KeySelection {
        temporal: first_timestamp?,
        identity: first_text.unwrap_or(columns.len().saturating_sub(1)),
    })
}

/// Build a table definition from the manifest and a sample header.
pub fn synthesize(table: &str, manifest: &[DeclaredType], header: &[String]) -> Result<TableSchema> {
    if header.len() != manifest.len() {
        return Err(IngestError::config_mismatch(
            table,
            format!(
                "{} column types declared, sample header has {} columns",
                manifest.len(),
                header.len()
            ),
        ));
    }

    let mut seen = HashSet::new();
    for name in header {
        if name.is_empty() {
            return Err(IngestError::config_mismatch(table, "sample header has an empty column name"));
        }
        if name.eq_ignore_ascii_case(SURROGATE_COLUMN) || name.eq_ignore_ascii_case(SOURCE_COLUMN) {
            return Err(IngestError::config_mismatch(
                table,
                format!("header column '{}' collides with an administrative column", name),
            ));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(IngestError::config_mismatch(
                table,
                format!("header column '{}' appears more than once", name),
            ));
        }
    }

    let columns: Vec<ColumnSpec> = header
        .iter()
        .zip(manifest)
        .map(|(name, declared_type)| ColumnSpec {
            name: name.clone(),
            declared_type: *declared_type,
        })
        .collect();

    let keys = select_keys(&columns).ok_or_else(|| {
        IngestError::config_mismatch(table, "no timestamp column declared, cannot select a temporal key")
    })?;

    Ok(TableSchema {
        name: table.to_string(),
        columns,
        keys,
    })
}

impl TableSchema {
    pub fn temporal_column(&self) -> &ColumnSpec {
        &self.columns[self.keys.temporal]
    }

    pub fn identity_column(&self) -> &ColumnSpec {
        &self.columns[self.keys.identity]
    }

    /// Columns covered by the uniqueness constraint, in constraint order.
    pub fn key_columns(&self) -> Vec<&str> {
        let mut keys = vec![SOURCE_COLUMN, self.temporal_column().name.as_str()];
        if self.keys.identity != self.keys.temporal {
            keys.push(self.identity_column().name.as_str());
        }
        keys
    }

    /// Check that a file's header describes this table.
    pub fn check_header(&self, header: &[String]) -> Result<()> {
        if header.len() != self.columns.len() {
            return Err(IngestError::config_mismatch(
                &self.name,
                format!(
                    "{} column types declared, file header has {} columns",
                    self.columns.len(),
                    header.len()
                ),
            ));
        }

        for (column, name) in self.columns.iter().zip(header) {
            if !column.name.eq_ignore_ascii_case(name) {
                return Err(IngestError::config_mismatch(
                    &self.name,
                    format!("file header has column '{}' where '{}' was expected", name, column.name),
                ));
            }
        }

        Ok(())
    }

    pub fn create_table_sql(&self) -> String {
        let keys = self.key_columns();
        let mut lines = vec![
            format!("    {} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(SURROGATE_COLUMN)),
            format!("    {} TEXT NOT NULL", quote_ident(SOURCE_COLUMN)),
        ];
        for column in &self.columns {
            let not_null = if keys.contains(&column.name.as_str()) {
                " NOT NULL"
            } else {
                ""
            };
            lines.push(format!(
                "    {} {}{}",
                quote_ident(&column.name),
                column.declared_type.sql_type(),
                not_null
            ));
        }
        lines.push(format!(
            "    UNIQUE ({})",
            keys.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ")
        ));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(&self.name),
            lines.join(",\n")
        )
    }

    /// Insert statement for rows laid out as `header`, with the station
    /// value bound first.
    pub fn insert_sql(&self, header: &[String]) -> String {
        let columns = std::iter::once(SOURCE_COLUMN)
            .chain(header.iter().map(String::as_str))
            .map(quote_ident)
            .collect::<Vec<_>>();
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    /// Highest stored temporal key for one station (`?1`).
    pub fn latest_timestamp_sql(&self) -> String {
        format!(
            "SELECT MAX({}) FROM {} WHERE {} = ?1",
            quote_ident(&self.temporal_column().name),
            quote_ident(&self.name),
            quote_ident(SOURCE_COLUMN)
        )
    }
}

/// Quote an identifier for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Tables ensured during this run.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Synthesize the schema and create the table if the store lacks it.
    ///
    /// The header/manifest check runs on every call. The store is consulted
    /// only the first time a table name is seen in this run.
    pub fn ensure_table<S: Store>(
        &mut self,
        store: &S,
        table: &str,
        manifest: &[DeclaredType],
        sample_header: &[String],
    ) -> Result<TableSchema> {
        let schema = synthesize(table, manifest, sample_header)?;
        if let Some(known) = self.tables.get(table) {
            return Ok(known.clone());
        }

        if store.table_exists(table)? {
            debug!(table, "Table already exists");
        } else {
            store
                .create_table(&schema)
                .map_err(|source| IngestError::SchemaCreation {
                    table: table.to_string(),
                    source,
                })?;
            info!(
                table,
                columns = schema.columns.len(),
                key = %schema.key_columns().join(", "),
                "Created table"
            );
        }

        self.tables.insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{SqlValue, SqliteStore, StoreResult};
    use std::cell::Cell;

    /// Counts DDL issued through it.
    struct CountingStore {
        inner: SqliteStore,
        creates: Cell<usize>,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                creates: Cell::new(0),
            }
        }
    }

    impl Store for CountingStore {
        fn table_exists(&self, table: &str) -> StoreResult<bool> {
            self.inner.table_exists(table)
        }
        fn create_table(&self, schema: &TableSchema) -> StoreResult<()> {
            self.creates.set(self.creates.get() + 1);
            self.inner.create_table(schema)
        }
        fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> StoreResult<Option<String>> {
            self.inner.query_scalar(sql, params)
        }
        fn execute(&self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
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

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn io_board_manifest() -> Vec<DeclaredType> {
        use DeclaredType::*;
        vec![Timestamp, Text, FloatingPoint, FloatingPoint, FloatingPoint, FloatingPoint]
    }

    fn io_board_header() -> Vec<String> {
        header(&["DateAndTime", "LoadName", "ShuntVoltage", "LoadVoltage", "Current", "Power"])
    }

    #[test]
    fn test_keys_first_timestamp_and_first_text() {
        let schema = synthesize("IOBoard1", &io_board_manifest(), &io_board_header()).unwrap();
        assert_eq!(schema.temporal_column().name, "DateAndTime");
        assert_eq!(schema.identity_column().name, "LoadName");
        assert_eq!(schema.key_columns(), vec!["station", "DateAndTime", "LoadName"]);
    }

    #[test]
    fn test_identity_falls_back_to_last_column() {
        use DeclaredType::*;
        let schema = synthesize(
            "t",
            &[Integer, Timestamp, FloatingPoint, Timestamp],
            &header(&["seq", "read_at", "value", "sent_at"]),
        )
        .unwrap();
        assert_eq!(schema.temporal_column().name, "read_at");
        assert_eq!(schema.identity_column().name, "sent_at");
    }

    #[test]
    fn test_single_timestamp_column_is_both_keys() {
        let schema = synthesize("t", &[DeclaredType::Timestamp], &header(&["ts"])).unwrap();
        assert_eq!(schema.key_columns(), vec!["station", "ts"]);
    }

    #[test]
    fn test_manifest_length_mismatch() {
        use DeclaredType::*;
        let err = synthesize(
            "t",
            &[Timestamp, Text, FloatingPoint, FloatingPoint, FloatingPoint],
            &header(&["ts", "name", "a", "b"]),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::ConfigMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_no_timestamp_column() {
        use DeclaredType::*;
        let err = synthesize("t", &[Text, FloatingPoint], &header(&["name", "v"])).unwrap_err();
        assert!(err.to_string().contains("no timestamp column"));
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        use DeclaredType::*;
        let err = synthesize("t", &[Timestamp, Text], &header(&["ts", "Station"])).unwrap_err();
        assert!(err.to_string().contains("administrative"));

        let err = synthesize("t", &[Timestamp, Text], &header(&["ts", "TS"])).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_create_table_sql() {
        let schema = synthesize("IOBoard1", &io_board_manifest(), &io_board_header()).unwrap();
        let sql = schema.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"IOBoard1\" (\n    \"id\" INTEGER PRIMARY KEY"));
        assert!(sql.contains("\"station\" TEXT NOT NULL"));
        assert!(sql.contains("\"DateAndTime\" TEXT NOT NULL"));
        assert!(sql.contains("\"ShuntVoltage\" REAL,"));
        assert!(sql.contains("UNIQUE (\"station\", \"DateAndTime\", \"LoadName\")"));
    }

    #[test]
    fn test_insert_and_watermark_sql() {
        use DeclaredType::*;
        let schema = synthesize("t", &[Timestamp, Text], &header(&["ts", "name"])).unwrap();
        assert_eq!(
            schema.insert_sql(&header(&["ts", "name"])),
            "INSERT INTO \"t\" (\"station\", \"ts\", \"name\") VALUES (?1, ?2, ?3)"
        );
        assert_eq!(
            schema.latest_timestamp_sql(),
            "SELECT MAX(\"ts\") FROM \"t\" WHERE \"station\" = ?1"
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_check_header() {
        let schema = synthesize("IOBoard1", &io_board_manifest(), &io_board_header()).unwrap();
        assert!(schema.check_header(&io_board_header()).is_ok());

        let mut renamed = io_board_header();
        renamed[1] = "Load".to_string();
        assert!(schema.check_header(&renamed).is_err());
        assert!(schema.check_header(&io_board_header()[..4]).is_err());
    }

    #[test]
    fn test_ensure_table_creates_once() {
        let store = CountingStore::new();
        let mut registry = SchemaRegistry::new();

        let first = registry
            .ensure_table(&store, "IOBoard1", &io_board_manifest(), &io_board_header())
            .unwrap();
        let second = registry
            .ensure_table(&store, "IOBoard1", &io_board_manifest(), &io_board_header())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.creates.get(), 1);
        assert!(store.table_exists("IOBoard1").unwrap());
        assert!(registry.get("IOBoard1").is_some());
    }

    #[test]
    fn test_ensure_table_skips_existing_table_from_previous_run() {
        let store = CountingStore::new();
        SchemaRegistry::new()
            .ensure_table(&store, "IOBoard1", &io_board_manifest(), &io_board_header())
            .unwrap();

        // A fresh registry models the next run against the same database.
        SchemaRegistry::new()
            .ensure_table(&store, "IOBoard1", &io_board_manifest(), &io_board_header())
            .unwrap();
        assert_eq!(store.creates.get(), 1);
    }

    #[test]
    fn test_ensure_table_rejects_mismatch_before_touching_store() {
        let store = CountingStore::new();
        let err = SchemaRegistry::new()
            .ensure_table(&store, "IOBoard1", &io_board_manifest(), &io_board_header()[..4])
            .unwrap_err();

        assert!(matches!(err, IngestError::ConfigMismatch { .. }));
        assert_eq!(store.creates.get(), 0);
        assert!(!store.table_exists("IOBoard1").unwrap());
    }
}
