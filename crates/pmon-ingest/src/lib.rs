//! PMon Ingest
//!
//! Incremental loader for power-monitor logger files. Every table in the
//! manifest has a root directory with one subdirectory per station; each run
//! loads only what the store does not hold yet, survives corrupted lines,
//! and shapes the target table from the manifest instead of a fixed schema.
//!
//! # Components
//!
//! - [`timestamp`]: canonical UTC text form for every timestamp column
//! - [`sanitize`]: corrupt row detection
//! - [`schema`]: table shape and uniqueness key from manifest + header
//! - [`watermark`]: latest stored timestamp per station
//! - [`admission`]: whole-file admit/skip decision against the watermark
//! - [`executor`]: row-by-row inserts with per-row outcomes
//! - [`enumerator`]: station and candidate file discovery
//! - [`pipeline`]: the run itself, producing a [`pipeline::RunReport`]
//!
//! # Example
//!
//! ```no_run
//! use pmon_ingest::{IngestConfig, Ingestor, SqliteStore};
//!
//! # fn main() -> pmon_ingest::Result<()> {
//! let config = IngestConfig::load("pmon.yml")?;
//! let store = SqliteStore::open(&config.database.path)?;
//! let report = Ingestor::new(store, config)?.run()?;
//! println!("{} rows inserted", report.rows().inserted);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod admission;
pub mod commands;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod reader;
pub mod sanitize;
pub mod schema;
pub mod store;
pub mod timestamp;
pub mod watermark;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use pipeline::{Ingestor, RunOptions, RunReport};
pub use store::{SqliteStore, Store};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// PMon Ingest - load station logger files into the measurement database
#[derive(Parser, Debug)]
#[command(name = "pmon-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest every configured table
    Run(RunArgs),

    /// Print the DDL each table would be created with
    Schema {
        /// Manifest file
        #[arg(short, long, env = "PMON_MANIFEST", default_value = config::DEFAULT_MANIFEST_FILE)]
        manifest: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Manifest file
    #[arg(short, long, env = "PMON_MANIFEST", default_value = config::DEFAULT_MANIFEST_FILE)]
    pub manifest: PathBuf,

    /// Database file (overrides the manifest)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Decide admissions without creating tables or inserting rows
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}
