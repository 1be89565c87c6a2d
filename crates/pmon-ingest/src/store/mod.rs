//! Relational store interface
//!
//! The engine only needs a handful of primitives from the database: a name
//! lookup, DDL for one table, a scalar query, parameterized writes, and an
//! explicit transaction boundary that can be committed or rolled back. Everything is blocking; a run owns exactly
//! one store for its whole duration.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::schema::TableSchema;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Expected when a file is
    /// re-admitted after an interrupted run.
    #[error("Duplicate key: {0}")]
    UniqueViolation(String),

    /// The database could not be opened or the connection was lost.
    #[error("Database connection error: {0}. Check the database path and permissions.")]
    Connection(String),

    #[error("Database error: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// Blocking primitives the ingestion engine issues against the database.
pub trait Store {
    /// Whether a table with this exact name exists.
    fn table_exists(&self, table: &str) -> StoreResult<bool>;

    /// Issue the DDL for `schema`.
    fn create_table(&self, schema: &TableSchema) -> StoreResult<()>;

    /// First column of the first row, or `None` for no row / SQL NULL.
    fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> StoreResult<Option<String>>;

    /// Execute a parameterized statement, returning the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> StoreResult<usize>;

    /// Open the transaction that groups one file's inserts.
    fn begin(&self) -> StoreResult<()>;

    fn commit(&self) -> StoreResult<()>;

    /// Discard the open transaction.
    fn rollback(&self) -> StoreResult<()>;
}
