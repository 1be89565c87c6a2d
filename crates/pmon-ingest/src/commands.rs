//! Subcommand implementations

use crate::config::IngestConfig;
use crate::enumerator::SourceEnumerator;
use crate::error::Result;
use crate::pipeline::{Ingestor, RunOptions, RunReport};
use crate::reader::FileReader;
use crate::schema::synthesize;
use crate::store::SqliteStore;
use crate::RunArgs;
use std::time::SystemTime;
use tracing::info;

/// Load the manifest, open the database and perform one run.
pub fn run(args: &RunArgs) -> Result<RunReport> {
    let mut config = IngestConfig::load(&args.manifest)?;
    if let Some(ref database) = args.database {
        config.database.path = database.clone();
    }

    info!(
        manifest = %args.manifest.display(),
        database = %config.database.path.display(),
        tables = config.tables.len(),
        dry_run = args.dry_run,
        "Starting run"
    );

    let store = SqliteStore::open(&config.database.path)?;
    Ingestor::new(store, config)?
        .with_options(RunOptions {
            dry_run: args.dry_run,
        })
        .run()
}

/// DDL for every table whose root holds at least one candidate file.
pub fn schema(manifest: &std::path::Path) -> Result<String> {
    let config = IngestConfig::load(manifest)?;
    let reader = FileReader::new(config.scan.delimiter_byte()?);
    let enumerator = SourceEnumerator::from(&config.scan);
    let now = SystemTime::now();

    let mut out = String::new();
    for table in &config.tables {
        let mut header = None;
        'sources: for source in enumerator.discover_sources(&table.root)? {
            for path in enumerator.candidate_files(&source, now)? {
                if let Ok(file) = reader.read(&path) {
                    if !file.header.is_empty() {
                        header = Some(file.header);
                        break 'sources;
                    }
                }
            }
        }

        match header {
            Some(header) => {
                let schema = synthesize(&table.name, &table.columns, &header)?;
                out.push_str(&format!("{};\n\n", schema.create_table_sql()));
            },
            None => {
                out.push_str(&format!("-- {}: no candidate files under {}\n\n", table.name, table.root.display()));
            },
        }
    }
    Ok(out)
}

/// Human-readable run summary, one line per table.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    for table in &report.tables {
        let files = table.files();
        let rows = table.rows();
        out.push_str(&format!(
            "{}: {} station(s), {} file(s) {} ({} with skipped rows), {} already present, {} failed; \
             {} row(s) inserted, {} corrupt, {} duplicate, {} failed",
            table.name,
            table.sources.len(),
            files.admitted,
            if report.dry_run { "to ingest" } else { "ingested" },
            files.partial,
            files.skipped,
            files.failed,
            rows.inserted,
            rows.corrupt,
            rows.duplicate,
            rows.failed,
        ));
        out.push('\n');
    }
    out
}
