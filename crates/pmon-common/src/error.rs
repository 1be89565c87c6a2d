//! Error types shared across PMon crates

use thiserror::Error;

/// Result type alias for PMon operations
pub type Result<T> = std::result::Result<T, PmonError>;

/// Main error type for PMon
#[derive(Error, Debug)]
pub enum PmonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown column type '{0}'. Expected one of: text, integer, float, timestamp")]
    UnknownColumnType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PmonError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
