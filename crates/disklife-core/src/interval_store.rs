//! Append-only SQLite store for closed failure intervals.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE failure_info (
//!     serial_number TEXT NOT NULL,
//!     model         TEXT NOT NULL,
//!     start_date    TEXT NOT NULL,  -- YYYY-MM-DD
//!     failure_date  TEXT NOT NULL   -- YYYY-MM-DD
//! );
//! ```
//!
//! Each file's intervals are appended in one transaction.

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::Result;
use crate::error::StorageError;
use crate::snapshot::FILE_DATE_FORMAT;
use crate::survival::FailureInterval;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS failure_info (
    serial_number TEXT NOT NULL,
    model         TEXT NOT NULL,
    start_date    TEXT NOT NULL,
    failure_date  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_failure_info_model ON failure_info(model);
";

/// Durable home of [`FailureInterval`]s.
pub struct IntervalStore {
    conn: Connection,
}

impl IntervalStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Database(format!(
                "Failed to open interval database {}: {e}",
                path.display()
            ))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(|e| {
            StorageError::Database(format!("Failed to initialize interval schema: {e}"))
        })?;
        Ok(Self { conn })
    }

    /// Append intervals atomically; returns the number written.
    pub fn append_batch(&mut self, intervals: &[FailureInterval]) -> Result<usize> {
        if intervals.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO failure_info (serial_number, model, start_date, failure_date)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for interval in intervals {
                stmt.execute(params![
                    interval.serial_number,
                    interval.model,
                    interval.start_date.format(FILE_DATE_FORMAT).to_string(),
                    interval.failure_date.format(FILE_DATE_FORMAT).to_string(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(appended = intervals.len(), "appended failure intervals");
        Ok(intervals.len())
    }

    /// Every stored interval, in insertion order.
    pub fn load_all(&self) -> Result<Vec<FailureInterval>> {
        let mut stmt = self.conn.prepare(
            "SELECT serial_number, model, start_date, failure_date
             FROM failure_info ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut intervals = Vec::new();
        for row in rows {
            let (serial_number, model, start, failure) = row?;
            intervals.push(FailureInterval {
                start_date: parse_date(&serial_number, &start)?,
                failure_date: parse_date(&serial_number, &failure)?,
                serial_number,
                model,
            });
        }
        Ok(intervals)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM failure_info", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Remove every stored interval.
    pub fn truncate(&mut self) -> Result<u64> {
        let removed = self.conn.execute("DELETE FROM failure_info", [])?;
        Ok(removed as u64)
    }
}

fn parse_date(serial_number: &str, value: &str) -> std::result::Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(value, FILE_DATE_FORMAT).map_err(|_| {
        StorageError::InvalidRecord(format!("{serial_number}: bad date {value:?}"))
    })
}
