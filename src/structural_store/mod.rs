//! Structural store: the relational source of truth for facts.
//!
//! A single SQLite database in WAL mode. `open` mirrors the teacher's
//! `MetadataIndex::open` (WAL + NORMAL synchronous for throughput,
//! `include_str!("schema.sql")` applied via `execute_batch`, integrity
//! check available on demand). On top of that shape this module adds the
//! epoch journal and two-phase publication protocol: a file's facts are
//! closed and replaced rather than deleted (see `writes.rs`), epochs are
//! recorded in their own table, and a one-row `epoch_journal` table records an in-flight
//! publication so a crash between the lexical commit and the structural
//! commit can be detected and reconciled on the next open.

mod journal;
mod queries;
mod writes;

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::StructuralStoreConfig;
use crate::error::{CodePlaneError, CodePlaneResult};

pub use journal::RecoveryAction;
pub use queries::FileStats;
pub use writes::{ContextUpsert, EpochWriteBatch, FileUpsert, FileWrite};

/// SQLite-backed structural fact store.
pub struct StructuralStore {
    conn: Mutex<Connection>,
    max_write_retries: u32,
    retry_backoff: Duration,
}

impl StructuralStore {
    /// Open or create a structural store at `db_path`.
    pub fn open(db_path: &Path, config: &StructuralStoreConfig) -> CodePlaneResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
            max_write_retries: config.max_write_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Run a fallible write, retrying with exponential backoff if it fails
    /// on a busy or locked database -- the per-call `busy_timeout` already
    /// blocks briefly, this covers contention that outlasts that wait.
    /// Once `max_write_retries` is exhausted, a lock failure becomes
    /// `CodePlaneError::Concurrency` rather than the generic `Structural`
    /// variant, so callers can tell a retryable write apart from a real
    /// corruption or schema error.
    fn with_retry<T>(&self, mut op: impl FnMut() -> CodePlaneResult<T>) -> CodePlaneResult<T> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(CodePlaneError::Structural(e)) if is_lock_contention(&e) && attempt < self.max_write_retries => {
                    tracing::warn!(attempt, error = %e, "structural write contended, retrying");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(CodePlaneError::Structural(e)) if is_lock_contention(&e) => {
                    return Err(CodePlaneError::Concurrency {
                        details: format!("write retried past busy-timeout bound: {e}"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_schema(&self) -> CodePlaneResult<()> {
        self.conn.lock().execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Run `PRAGMA integrity_check`.
    pub fn check_integrity(&self) -> CodePlaneResult<bool> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

fn is_lock_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
