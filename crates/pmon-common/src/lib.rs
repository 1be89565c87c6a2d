//! PMon Common Library
//!
//! Shared types, logging, and error handling for the PMon workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`PmonError`] and the [`Result`] alias
//! - **Logging**: centralised `tracing` setup driven by [`logging::LogConfig`]
//! - **Types**: the column types a type manifest is written in
//!
//! # Example
//!
//! ```no_run
//! use pmon_common::types::DeclaredType;
//!
//! fn parse_manifest(entries: &[&str]) -> pmon_common::Result<Vec<DeclaredType>> {
//!     entries.iter().map(|entry| entry.parse()).collect()
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PmonError, Result};
pub use types::DeclaredType;
