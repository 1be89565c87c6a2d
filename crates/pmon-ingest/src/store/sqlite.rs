//! SQLite-backed store

use super::{SqlValue, Store, StoreError, StoreResult};
use crate::schema::TableSchema;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How long a write waits for another run's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database file, creating it (and its parent directories) if
    /// it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let existed = path.exists();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("Failed to open {}: {}", path.display(), e))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if existed {
            debug!(path = %path.display(), "Opened existing database");
        } else {
            debug!(path = %path.display(), "Created database");
        }

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory database: {}", e)))?;
        Ok(Self { conn, path: None })
    }

    /// Location of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Store for SqliteStore {
    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()
            .map_err(classify)?;
        Ok(found.is_some())
    }

    fn create_table(&self, schema: &TableSchema) -> StoreResult<()> {
        self.conn
            .execute_batch(&schema.create_table_sql())
            .map_err(classify)
    }

    fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify)?;
        let value = stmt
            .query_row(params_from_iter(params.iter()), |row| {
                Ok(value_to_text(row.get_ref(0)?))
            })
            .optional()
            .map_err(classify)?;
        Ok(value.flatten())
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify)?;
        stmt.execute(params_from_iter(params.iter())).map_err(classify)
    }

    fn begin(&self) -> StoreResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(classify)
    }

    fn commit(&self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT").map_err(classify)
    }

    fn rollback(&self) -> StoreResult<()> {
        self.conn.execute_batch("ROLLBACK").map_err(classify)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            SqlValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            SqlValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
        })
    }
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        },
    }
}

fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::UniqueViolation(err.to_string())
            },
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        _ => StoreError::Query(err.to_string()),
    }
}
