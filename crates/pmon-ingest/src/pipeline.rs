//! Run orchestration
//!
//! One run walks every configured table in manifest order:
//!
//! 1. discover the table's stations
//! 2. check every candidate header against the manifest, then ensure the
//!    table exists, shaped from the first readable file header
//! 3. per station, read the watermark once
//! 4. per file in name order, decide admission and ingest admitted files
//!
//! File-local failures are recorded in the report and the run moves on.
//! Anything fatal stops the run; files already committed stay committed.

use crate::admission::{decide, Admission};
use crate::config::{IngestConfig, TableConfig};
use crate::enumerator::{LogicalSource, SourceEnumerator};
use crate::error::{IngestError, Result};
use crate::executor::{self, Executor, IngestionOutcome, RowCounts};
use crate::reader::FileReader;
use crate::schema::{synthesize, SchemaRegistry, TableSchema};
use crate::store::Store;
use crate::timestamp::CanonicalTimestamp;
use crate::watermark::latest_timestamp;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Decide admissions without creating tables or inserting rows.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub name: String,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub watermark: CanonicalTimestamp,
    pub files: Vec<FileReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// `None` for a file a dry run would have ingested.
    pub outcome: Option<IngestionOutcome>,
    pub last_timestamp: Option<CanonicalTimestamp>,
    pub rows: RowCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Files per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileTally {
    pub admitted: usize,
    pub skipped: usize,
    pub partial: usize,
    pub failed: usize,
}

impl FileTally {
    fn record(&mut self, file: &FileReport) {
        match file.outcome {
            None | Some(IngestionOutcome::IngestedFully) => self.admitted += 1,
            Some(IngestionOutcome::IngestedWithSkippedCorruptRows) => {
                self.admitted += 1;
                self.partial += 1;
            },
            Some(IngestionOutcome::SkippedAlreadyPresent) => self.skipped += 1,
            Some(IngestionOutcome::Failed) => self.failed += 1,
        }
    }
}

impl SourceReport {
    pub fn files(&self) -> FileTally {
        let mut tally = FileTally::default();
        self.files.iter().for_each(|f| tally.record(f));
        tally
    }

    pub fn rows(&self) -> RowCounts {
        let mut rows = RowCounts::default();
        self.files.iter().for_each(|f| rows.add(&f.rows));
        rows
    }
}

impl TableReport {
    pub fn files(&self) -> FileTally {
        let mut tally = FileTally::default();
        for file in self.sources.iter().flat_map(|s| &s.files) {
            tally.record(file);
        }
        tally
    }

    pub fn rows(&self) -> RowCounts {
        let mut rows = RowCounts::default();
        self.sources.iter().for_each(|s| rows.add(&s.rows()));
        rows
    }
}

impl RunReport {
    pub fn files(&self) -> FileTally {
        let mut tally = FileTally::default();
        for file in self.tables.iter().flat_map(|t| &t.sources).flat_map(|s| &s.files) {
            tally.record(file);
        }
        tally
    }

    pub fn rows(&self) -> RowCounts {
        let mut rows = RowCounts::default();
        self.tables.iter().for_each(|t| rows.add(&t.rows()));
        rows
    }
}

/// Drives a run against one store.
pub struct Ingestor<S: Store> {
    store: S,
    config: IngestConfig,
    options: RunOptions,
    reader: FileReader,
    enumerator: SourceEnumerator,
    registry: SchemaRegistry,
}

impl<S: Store> Ingestor<S> {
    pub fn new(store: S, config: IngestConfig) -> Result<Self> {
        let reader = FileReader::new(config.scan.delimiter_byte()?);
        let enumerator = SourceEnumerator::from(&config.scan);
        Ok(Self {
            store,
            config,
            options: RunOptions::default(),
            reader,
            enumerator,
            registry: SchemaRegistry::new(),
        })
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Process every configured table.
    pub fn run(&mut self) -> Result<RunReport> {
        let now = SystemTime::now();
        let tables = self.config.tables.clone();
        let mut report = RunReport {
            dry_run: self.options.dry_run,
            tables: Vec::with_capacity(tables.len()),
        };

        for table in &tables {
            match self.run_table(table, now) {
                Ok(table_report) => report.tables.push(table_report),
                Err(e) => {
                    error!(table = %table.name, error = %e, "Aborting run");
                    return Err(e);
                },
            }
        }

        let files = report.files();
        let rows = report.rows();
        info!(
            tables = report.tables.len(),
            admitted = files.admitted,
            skipped = files.skipped,
            failed = files.failed,
            inserted = rows.inserted,
            corrupt = rows.corrupt,
            duplicate = rows.duplicate,
            dry_run = self.options.dry_run,
            "Run complete"
        );
        Ok(report)
    }

    fn run_table(&mut self, table: &TableConfig, now: SystemTime) -> Result<TableReport> {
        let _span = info_span!("table", table = %table.name).entered();

        let sources = self.enumerator.discover_sources(&table.root)?;
        let mut candidates = Vec::with_capacity(sources.len());
        for source in sources {
            let files = self.enumerator.candidate_files(&source, now)?;
            candidates.push((source, files));
        }

        let mut report = TableReport {
            name: table.name.clone(),
            sources: Vec::new(),
        };

        let all_files = candidates.iter().flat_map(|(_, files)| files);
        let Some(header) = self.sample_header(all_files) else {
            info!(root = %table.root.display(), "No candidate files");
            return Ok(report);
        };

        // Every header must match the manifest before the table is touched
        let schema = synthesize(&table.name, &table.columns, &header)?;
        self.check_headers(&schema, candidates.iter().flat_map(|(_, files)| files))?;

        let (schema, table_exists) = if self.options.dry_run {
            let exists = self.store.table_exists(&table.name)?;
            (schema, exists)
        } else {
            let schema = self
                .registry
                .ensure_table(&self.store, &table.name, &table.columns, &header)?;
            (schema, true)
        };

        for (source, files) in &candidates {
            report
                .sources
                .push(self.run_source(&schema, table_exists, source, files)?);
        }

        let files = report.files();
        let rows = report.rows();
        info!(
            sources = report.sources.len(),
            admitted = files.admitted,
            skipped = files.skipped,
            partial = files.partial,
            failed = files.failed,
            inserted = rows.inserted,
            "Table complete"
        );
        Ok(report)
    }

    /// Header of the first candidate file that has one.
    fn sample_header<'p>(&self, files: impl Iterator<Item = &'p PathBuf>) -> Option<Vec<String>> {
        files
            .filter_map(|path| self.reader.read(path).ok())
            .map(|file| file.header)
            .find(|header| !header.is_empty())
    }

    /// Fail with a mismatch if any readable candidate's header disagrees
    /// with `schema`. Unreadable and empty files are left to the per-file
    /// pass, where they fail on their own.
    fn check_headers<'p>(&self, schema: &TableSchema, files: impl Iterator<Item = &'p PathBuf>) -> Result<()> {
        for path in files {
            let Ok(file) = self.reader.read(path) else {
                continue;
            };
            if !file.header.is_empty() {
                schema.check_header(&file.header).inspect_err(|e| {
                    error!(file = %path.display(), error = %e, "Header does not match manifest");
                })?;
            }
        }
        Ok(())
    }

    fn run_source(
        &self,
        schema: &TableSchema,
        table_exists: bool,
        source: &LogicalSource,
        files: &[PathBuf],
    ) -> Result<SourceReport> {
        let _span = info_span!("source", source = %source.name).entered();

        let watermark = if table_exists {
            latest_timestamp(&self.store, schema, &source.name)?
        } else {
            CanonicalTimestamp::epoch()
        };

        let executor = Executor::new(&self.store, schema, self.reader);
        let mut report = SourceReport {
            name: source.name.clone(),
            watermark,
            files: Vec::with_capacity(files.len()),
        };

        for path in files {
            let file_report = match self.process_file(&executor, schema, &source.name, path, watermark) {
                Ok(file_report) => file_report,
                Err(e) if !e.is_fatal() => {
                    warn!(file = %path.display(), error = %e, "File not ingested");
                    failed(path, None, &e)
                },
                Err(e) => return Err(e),
            };
            report.files.push(file_report);
        }

        let tally = report.files();
        let rows = report.rows();
        info!(
            %watermark,
            files = report.files.len(),
            admitted = tally.admitted,
            skipped = tally.skipped,
            partial = tally.partial,
            failed = tally.failed,
            inserted = rows.inserted,
            corrupt = rows.corrupt,
            duplicate = rows.duplicate,
            "Station complete"
        );
        Ok(report)
    }

    fn process_file(
        &self,
        executor: &Executor<'_, S>,
        schema: &TableSchema,
        source: &str,
        path: &Path,
        watermark: CanonicalTimestamp,
    ) -> Result<FileReport> {
        let file = self.reader.read(path)?;
        if file.header.is_empty() {
            return Err(IngestError::NoValidRows(path.to_path_buf()));
        }
        schema.check_header(&file.header)?;

        let admission = decide(&file, schema, watermark)?;
        let last_timestamp = Some(admission.last_timestamp());

        match admission {
            Admission::Skip { last_timestamp: ts } => {
                let summary = executor::skipped(path, ts);
                Ok(FileReport {
                    path: summary.path,
                    outcome: Some(summary.outcome),
                    last_timestamp,
                    rows: summary.rows,
                    error: None,
                })
            },
            Admission::Admit { .. } if self.options.dry_run => {
                info!(file = %path.display(), last_timestamp = ?last_timestamp, "Would ingest file");
                Ok(FileReport {
                    path: path.to_path_buf(),
                    outcome: None,
                    last_timestamp,
                    rows: RowCounts::default(),
                    error: None,
                })
            },
            Admission::Admit { .. } => match executor.ingest(source, path) {
                Ok(summary) => Ok(FileReport {
                    path: summary.path,
                    outcome: Some(summary.outcome),
                    last_timestamp,
                    rows: summary.rows,
                    error: None,
                }),
                Err(e) if !e.is_fatal() => {
                    warn!(file = %path.display(), error = %e, "File not ingested");
                    Ok(failed(path, last_timestamp, &e))
                },
                Err(e) => Err(e),
            },
        }
    }
}

fn failed(path: &Path, last_timestamp: Option<CanonicalTimestamp>, err: &IngestError) -> FileReport {
    FileReport {
        path: path.to_path_buf(),
        outcome: Some(IngestionOutcome::Failed),
        last_timestamp,
        rows: RowCounts::default(),
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ScanConfig};
    use crate::store::SqliteStore;
    use pmon_common::DeclaredType;
    use std::fs;

    const HEADER: &str = "DateAndTime,LoadName,Power\n";

    fn config(root: &Path) -> IngestConfig {
        IngestConfig {
            database: DatabaseConfig::default(),
            scan: ScanConfig {
                min_file_age_secs: 0,
                ..ScanConfig::default()
            },
            tables: vec![TableConfig {
                name: "IOBoard1".to_string(),
                root: root.to_path_buf(),
                columns: vec![DeclaredType::Timestamp, DeclaredType::Text, DeclaredType::FloatingPoint],
            }],
        }
    }

    fn write(dir: &Path, name: &str, rows: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), format!("{HEADER}{rows}")).unwrap();
    }

    fn ingestor(root: &Path) -> Ingestor<SqliteStore> {
        Ingestor::new(SqliteStore::open_in_memory().unwrap(), config(root)).unwrap()
    }

    #[test]
    fn test_second_file_in_same_run_uses_initial_watermark() {
        let root = tempfile::tempdir().unwrap();
        let station = root.path().join("station-a");
        write(&station, "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");
        // Ends before the first file but is still admitted: the watermark is
        // not advanced during a run.
        write(&station, "PowerMonitor-20240102.csv", "2023-12-31T00:00:00Z,load-1,2.0\n");

        let report = ingestor(root.path()).run().unwrap();
        let files = &report.tables[0].sources[0].files;
        assert!(report.tables[0].sources[0].watermark.is_epoch());
        assert_eq!(files[0].outcome, Some(IngestionOutcome::IngestedFully));
        assert_eq!(files[1].outcome, Some(IngestionOutcome::IngestedFully));
    }

    #[test]
    fn test_rerun_skips_everything() {
        let root = tempfile::tempdir().unwrap();
        let station = root.path().join("station-a");
        write(&station, "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");

        let mut ingestor = ingestor(root.path());
        let first = ingestor.run().unwrap();
        assert_eq!(first.rows().inserted, 1);

        let second = ingestor.run().unwrap();
        assert_eq!(second.files().skipped, 1);
        assert_eq!(second.rows().inserted, 0);
        assert_eq!(
            second.tables[0].sources[0].watermark.to_string(),
            "2024-01-01 00:00:00.000000"
        );
    }

    #[test]
    fn test_empty_file_fails_alone() {
        let root = tempfile::tempdir().unwrap();
        let station = root.path().join("station-a");
        fs::create_dir_all(&station).unwrap();
        fs::write(station.join("PowerMonitor-20240100.csv"), "").unwrap();
        write(&station, "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");
        write(&station, "PowerMonitor-20240102.csv", "\u{fffd}\u{fffd},load-1,1.0\n");

        let report = ingestor(root.path()).run().unwrap();
        let files = &report.tables[0].sources[0].files;
        assert_eq!(files[0].outcome, Some(IngestionOutcome::Failed));
        assert_eq!(files[1].outcome, Some(IngestionOutcome::IngestedFully));
        assert_eq!(files[2].outcome, Some(IngestionOutcome::Failed));
        assert!(files[2].error.as_deref().unwrap().contains("No valid rows"));
        assert_eq!(report.files().failed, 2);
    }

    #[test]
    fn test_mismatched_header_in_later_station_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("station-a"), "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");
        let station_b = root.path().join("station-b");
        fs::create_dir_all(&station_b).unwrap();
        fs::write(
            station_b.join("PowerMonitor-20240101.csv"),
            "DateAndTime,LoadName\n2024-01-01T00:00:00Z,load-1\n",
        )
        .unwrap();

        let mut ingestor = ingestor(root.path());
        let err = ingestor.run().unwrap_err();

        assert!(matches!(err, IngestError::ConfigMismatch { .. }), "got {err:?}");
        assert!(!ingestor.store().table_exists("IOBoard1").unwrap());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("station-a"), "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");

        let mut ingestor = ingestor(root.path()).with_options(RunOptions { dry_run: true });
        let report = ingestor.run().unwrap();

        assert!(report.dry_run);
        assert_eq!(report.tables[0].sources[0].files[0].outcome, None);
        assert_eq!(report.files().admitted, 1);
        assert!(!ingestor.store().table_exists("IOBoard1").unwrap());
    }

    #[test]
    fn test_no_candidate_files_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("station-a")).unwrap();

        let mut ingestor = ingestor(root.path());
        let report = ingestor.run().unwrap();
        assert!(report.tables[0].sources.is_empty());
        assert!(!ingestor.store().table_exists("IOBoard1").unwrap());
    }

    #[test]
    fn test_report_serializes() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("station-a"), "PowerMonitor-20240101.csv", "2024-01-01T00:00:00Z,load-1,1.0\n");

        let report = ingestor(root.path()).run().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        let file = &json["tables"][0]["sources"][0]["files"][0];
        assert_eq!(file["outcome"], "ingested_fully");
        assert_eq!(file["last_timestamp"], "2024-01-01 00:00:00.000000");
        assert_eq!(file["rows"]["inserted"], 1);
        assert!(file.get("error").is_none());
    }
}
