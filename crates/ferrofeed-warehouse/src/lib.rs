//! # Ferrofeed Warehouse
//!
//! DuckDB-backed storage for feed events and the metric queries computed
//! over them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrofeed_warehouse::{EventRecord, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::new("data/events.duckdb"))?;
//!
//!     let report = warehouse.insert_events(&[EventRecord {
//!         id: "42".to_string(),
//!         kind: "WatchEvent".to_string(),
//!         repo_name: Some("rust-lang/rust".to_string()),
//!         created_at: "2024-01-01T00:00:00Z".to_string(),
//!     }])?;
//!     println!("inserted {} events", report.inserted);
//!
//!     for row in warehouse.event_counts_in_window(60)? {
//!         println!("{}: {}", row.event_type, row.count);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Every call opens its own connection and closes it before returning, so
//! separate processes can share the database file.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `events` | One row per upstream event id |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ::duckdb::{params, Connection};
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub use crate::duckdb::{Access, DatabaseFile, FileConnection, LockRetry};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Operation was refused before touching the database.
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Backoff when another process holds the file.
    pub lock_retry: LockRetry,
}

impl WarehouseConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            lock_retry: LockRetry::default(),
        }
    }
}

/// An event row as handed to storage.
///
/// Fields are kept as plain strings so that a bad record can be detected and
/// skipped here instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: String,
    pub kind: String,
    pub repo_name: Option<String>,
    /// RFC3339 timestamp.
    pub created_at: String,
}

/// Outcome of one `insert_events` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Rows newly written.
    pub inserted: usize,
    /// Records whose id was already stored (or repeated within the batch).
    pub duplicates: usize,
    /// Records rejected by validation or by the database.
    pub skipped: usize,
}

/// Number of stored events of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: u64,
}

/// Event storage backed by a `DuckDB` file.
///
/// Holds no connection between calls.
#[derive(Debug, Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    file: DatabaseFile,
}

impl Warehouse {
    /// Open a warehouse with the specified configuration and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = DatabaseFile::new(config.db_path.clone(), config.lock_retry);
        let warehouse = Self { config, file };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.file.connect(Access::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.file.path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Store events with insert-or-ignore semantics on `id`.
    ///
    /// Records that fail validation (empty id or type, unparseable
    /// `created_at`) are logged and skipped; the remaining records are
    /// committed in a single transaction. If the database rejects that
    /// transaction, the records are retried one at a time and the ones it
    /// still rejects are logged and counted as skipped. The call fails only
    /// when no record can be written.
    pub fn insert_events(&self, records: &[EventRecord]) -> Result<IngestReport, WarehouseError> {
        let mut report = IngestReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            match validate_record(record) {
                Ok(created_at_ms) => valid.push((record, created_at_ms)),
                Err(reason) => {
                    warn!(event_id = %record.id, %reason, "skipping malformed event record");
                    report.skipped += 1;
                }
            }
        }

        if valid.is_empty() {
            return Ok(report);
        }

        let connection = self.file.connect(Access::ReadWrite)?;
        let stored = store_records(&connection, &valid)?;
        report.inserted += stored.inserted;
        report.duplicates += stored.duplicates;
        report.skipped += stored.skipped;

        debug!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "event batch committed"
        );
        Ok(report)
    }

    /// Total number of stored events.
    pub fn count_events(&self) -> Result<u64, WarehouseError> {
        let connection = self.file.connect(Access::ReadOnly)?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Per-type event counts for events created at or after `cutoff_epoch_ms`.
    pub fn event_counts_since(
        &self,
        cutoff_epoch_ms: i64,
    ) -> Result<Vec<EventTypeCount>, WarehouseError> {
        let connection = self.file.connect(Access::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT type, COUNT(id) FROM events \
             WHERE epoch_ms(created_at) >= CAST(? AS BIGINT) \
             GROUP BY type ORDER BY type",
        )?;
        let rows = statement.query_map(params![cutoff_epoch_ms], |row| {
            let count: i64 = row.get(1)?;
            Ok(EventTypeCount {
                event_type: row.get(0)?,
                count: count.max(0) as u64,
            })
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Per-type event counts for the last `offset_minutes` minutes.
    pub fn event_counts_in_window(
        &self,
        offset_minutes: u32,
    ) -> Result<Vec<EventTypeCount>, WarehouseError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        let cutoff = now_ms - i64::from(offset_minutes) * 60_000;
        self.event_counts_since(cutoff)
    }

    /// Mean gap in seconds between consecutive pull request events, per
    /// repository. Repositories with fewer than two such events are omitted.
    pub fn avg_pull_request_interval(&self) -> Result<BTreeMap<String, f64>, WarehouseError> {
        let connection = self.file.connect(Access::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT repo_name, epoch_ms(created_at) FROM events \
             WHERE type = 'PullRequestEvent' AND repo_name IS NOT NULL \
             ORDER BY repo_name, created_at ASC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut timelines: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for row in rows {
            let (repo, created_at_ms) = row?;
            timelines.entry(repo).or_default().push(created_at_ms);
        }

        Ok(timelines
            .into_iter()
            .filter_map(|(repo, stamps)| mean_gap_seconds(&stamps).map(|gap| (repo, gap)))
            .collect())
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        let connection = self.file.connect(Access::ReadOnly)?;
        let _: i64 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }
}

/// Returns `created_at` in epoch milliseconds, or why the record is unusable.
fn validate_record(record: &EventRecord) -> Result<i64, String> {
    if record.id.trim().is_empty() {
        return Err(String::from("missing id"));
    }
    if record.kind.trim().is_empty() {
        return Err(String::from("missing type"));
    }
    let created_at = OffsetDateTime::parse(&record.created_at, &Rfc3339)
        .map_err(|_| format!("created_at '{}' is not RFC3339", record.created_at))?;
    Ok((created_at.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn mean_gap_seconds(stamps_ms: &[i64]) -> Option<f64> {
    if stamps_ms.len() < 2 {
        return None;
    }
    let total: i64 = stamps_ms.windows(2).map(|pair| pair[1] - pair[0]).sum();
    Some(total as f64 / 1000.0 / (stamps_ms.len() - 1) as f64)
}

/// Insert validated records in one transaction, falling back to one record
/// at a time if the transaction fails.
fn store_records(
    connection: &Connection,
    records: &[(&EventRecord, i64)],
) -> Result<IngestReport, WarehouseError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let batch = (|| -> Result<IngestReport, WarehouseError> {
        let mut report = IngestReport::default();
        for &(record, created_at_ms) in records {
            if insert_record(connection, record, created_at_ms)? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        Ok(report)
    })();

    match finalize_transaction(connection, batch) {
        Ok(report) => Ok(report),
        Err(error) => {
            warn!(
                %error,
                records = records.len(),
                "batch insert failed, storing records one at a time"
            );
            store_each(connection, records, error)
        }
    }
}

/// Autocommit insert per record; a rejected record is skipped. Returns
/// `batch_error` when every record is rejected.
fn store_each(
    connection: &Connection,
    records: &[(&EventRecord, i64)],
    batch_error: WarehouseError,
) -> Result<IngestReport, WarehouseError> {
    let mut report = IngestReport::default();
    for &(record, created_at_ms) in records {
        match insert_record(connection, record, created_at_ms) {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.duplicates += 1,
            Err(error) => {
                warn!(event_id = %record.id, %error, "database rejected event record");
                report.skipped += 1;
            }
        }
    }

    if report.skipped == records.len() {
        return Err(batch_error);
    }
    Ok(report)
}

/// Returns `false` when the id is already stored.
fn insert_record(
    connection: &Connection,
    record: &EventRecord,
    created_at_ms: i64,
) -> Result<bool, WarehouseError> {
    let existing: i64 = connection.query_row(
        "SELECT COUNT(*) FROM events WHERE id = ?",
        params![record.id],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(false);
    }

    connection.execute(
        "INSERT OR IGNORE INTO events (id, type, repo_name, created_at, ingested_at) \
         VALUES (?, ?, ?, epoch_ms(CAST(? AS BIGINT)), CURRENT_TIMESTAMP)",
        params![record.id, record.kind, record.repo_name, created_at_ms],
    )?;
    Ok(true)
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                let _ = connection.execute_batch("ROLLBACK");
                Err(error.into())
            }
        },
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}
