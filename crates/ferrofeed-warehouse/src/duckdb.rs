//! Short-lived `DuckDB` connections.
//!
//! An open `DuckDB` database holds a lock on its file until the last
//! connection closes, and a second process cannot open the file meanwhile.
//! The warehouse therefore opens a connection per call and drops it when the
//! call returns, so the poller and metric readers in other processes take
//! turns on the file. An open that runs into another process's lock is
//! retried with a short backoff.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use ::duckdb::{AccessMode, Config, Connection};
use tracing::debug;

/// Backoff for opens that hit a lock held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    /// Total open attempts, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 12,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl LockRetry {
    /// Sleeps between attempts: doubling from `initial_delay`, capped at
    /// `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts.saturating_sub(1)).map(move |retry| {
            self.initial_delay
                .saturating_mul(2_u32.saturating_pow(retry))
                .min(self.max_delay)
        })
    }

    /// Run `open` until it succeeds, fails with an error `is_conflict`
    /// rejects, or the attempts run out.
    pub fn run<T, E, F, C>(&self, mut open: F, is_conflict: C) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        C: Fn(&E) -> bool,
    {
        let mut delays = self.delays();
        loop {
            match open() {
                Ok(value) => return Ok(value),
                Err(error) if is_conflict(&error) => match delays.next() {
                    Some(delay) => {
                        debug!(
                            delay_ms = delay.as_millis() as u64,
                            "database file is locked, retrying"
                        );
                        thread::sleep(delay);
                    }
                    None => return Err(error),
                },
                Err(error) => return Err(error),
            }
        }
    }
}

/// Whether a connection may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Opens connections to one database file on demand.
///
/// Clones share a gate, so one process never holds two database instances of
/// the same file at once.
#[derive(Debug, Clone)]
pub struct DatabaseFile {
    path: PathBuf,
    lock_retry: LockRetry,
    gate: Arc<Mutex<()>>,
}

impl DatabaseFile {
    pub fn new(path: impl Into<PathBuf>, lock_retry: LockRetry) -> Self {
        Self {
            path: path.into(),
            lock_retry,
            gate: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection that releases the file when dropped.
    ///
    /// # Errors
    /// Returns the last open error once the lock retries are used up, or the
    /// first error that is not a lock conflict.
    pub fn connect(&self, access: Access) -> Result<FileConnection<'_>, ::duckdb::Error> {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let connection = self
            .lock_retry
            .run(|| open_connection(&self.path, access), is_lock_conflict)?;
        connection.execute_batch("PRAGMA disable_progress_bar;")?;

        Ok(FileConnection {
            connection,
            _gate: gate,
        })
    }
}

/// A connection that closes the database file when dropped.
pub struct FileConnection<'a> {
    // Declared before the gate so the file is released first.
    connection: Connection,
    _gate: MutexGuard<'a, ()>,
}

impl Deref for FileConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

fn open_connection(path: &Path, access: Access) -> Result<Connection, ::duckdb::Error> {
    let mode = match access {
        Access::ReadOnly => AccessMode::ReadOnly,
        Access::ReadWrite => AccessMode::ReadWrite,
    };
    Connection::open_with_flags(path, Config::default().access_mode(mode)?)
}

/// `DuckDB` reports a lock held elsewhere as "Could not set lock on file".
pub fn is_lock_conflict(error: &::duckdb::Error) -> bool {
    let message = error.to_string();
    message.contains("Could not set lock") || message.contains("Conflicting lock")
}
