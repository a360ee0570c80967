//! Survival pass: turns daily alive/failed observations into closed
//! failure intervals.
//!
//! # State machine
//!
//! ```text
//!            alive row                      failed row
//!  UNSEEN ─────────────▶ ALIVE(since) ─────────────────▶ UNSEEN
//!     │                     │  ▲                 emits FailureInterval(since, date)
//!     │ failed row          └──┘ alive row
//!     ▼                       (since retained)
//!  (discarded, no interval)
//! ```
//!
//! Rows must arrive in non-decreasing date order. The extractor checks this
//! and refuses out-of-order input instead of corrupting watermarks.

use std::collections::HashMap;
use std::io::Read;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SnapshotError;
use crate::snapshot::{SnapshotReader, SnapshotRow};
use crate::{Error, Result};

// =============================================================================
// Types
// =============================================================================

/// A closed run from the earliest alive observation to the first failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInterval {
    pub serial_number: String,
    pub model: String,
    pub start_date: NaiveDate,
    pub failure_date: NaiveDate,
}

impl FailureInterval {
    /// Survival duration in days.
    #[must_use]
    pub fn duration_days(&self) -> f64 {
        (self.failure_date - self.start_date).num_days() as f64
    }
}

/// Per-serial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurvivalState {
    Unseen,
    Alive { since: NaiveDate },
}

/// Transitions caused by one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurvivalOutcome {
    pub rows: usize,
    pub opened: usize,
    pub closed: Vec<FailureInterval>,
    /// Failures with no open watermark.
    pub discarded_failures: usize,
}

// =============================================================================
// Extractor
// =============================================================================

/// Owns the watermark map. Serials absent from the map are `UNSEEN`.
#[derive(Debug, Default)]
pub struct IntervalExtractor {
    watermarks: HashMap<String, NaiveDate>,
    latest: Option<NaiveDate>,
}

impl IntervalExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, serial_number: &str) -> SurvivalState {
        self.watermarks
            .get(serial_number)
            .map_or(SurvivalState::Unseen, |since| SurvivalState::Alive { since: *since })
    }

    /// Latest date observed so far.
    #[must_use]
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.latest
    }

    fn check_order(&self, date: NaiveDate) -> Result<()> {
        match self.latest {
            Some(latest) if date < latest => Err(Error::OrderingViolation(format!(
                "survival row dated {date} arrived after {latest}"
            ))),
            _ => Ok(()),
        }
    }

    /// Apply one row.
    pub fn observe(&mut self, row: &SnapshotRow) -> Result<Option<FailureInterval>> {
        self.check_order(row.date)?;
        self.latest = Some(row.date);
        Ok(self.transition(&row.serial_number, &row.model, row.date, row.failure))
    }

    fn transition(
        &mut self,
        serial_number: &str,
        model: &str,
        date: NaiveDate,
        failure: bool,
    ) -> Option<FailureInterval> {
        if !failure {
            self.watermarks
                .entry(serial_number.to_string())
                .or_insert(date);
            return None;
        }
        self.watermarks
            .remove(serial_number)
            .map(|since| FailureInterval {
                serial_number: serial_number.to_string(),
                model: model.to_string(),
                start_date: since,
                failure_date: date,
            })
    }

    /// Fold every row a reader yields.
    pub fn fold_reader<R: Read>(&mut self, reader: SnapshotReader<R>) -> Result<SurvivalOutcome> {
        let date = reader.date();
        self.fold_rows(date, reader)
    }

    /// Apply one file. Rows are read in full before any transition, so a
    /// malformed file changes nothing.
    ///
    /// Repeated rows for one serial collapse to a single observation: failed
    /// if any row failed, with the model of the first failing row.
    pub fn fold_rows<I>(&mut self, date: NaiveDate, rows: I) -> Result<SurvivalOutcome>
    where
        I: IntoIterator<Item = std::result::Result<SnapshotRow, SnapshotError>>,
    {
        self.check_order(date)?;

        let mut order: Vec<String> = Vec::new();
        let mut collapsed: HashMap<String, (String, bool)> = HashMap::new();
        let mut row_count = 0usize;
        for row in rows {
            let row = row?;
            row_count += 1;
            match collapsed.get_mut(&row.serial_number) {
                Some((model, failure)) => {
                    if row.failure && !*failure {
                        *model = row.model;
                        *failure = true;
                    }
                }
                None => {
                    order.push(row.serial_number.clone());
                    collapsed.insert(row.serial_number, (row.model, row.failure));
                }
            }
        }

        self.latest = Some(date);
        let mut outcome = SurvivalOutcome {
            rows: row_count,
            ..SurvivalOutcome::default()
        };
        for serial in order {
            let Some((model, failure)) = collapsed.remove(&serial) else {
                continue;
            };
            let was_unseen = !self.watermarks.contains_key(&serial);
            match self.transition(&serial, &model, date, failure) {
                Some(interval) => outcome.closed.push(interval),
                None if failure => outcome.discarded_failures += 1,
                None if was_unseen => outcome.opened += 1,
                None => {}
            }
        }

        debug!(
            date = %date,
            rows = outcome.rows,
            opened = outcome.opened,
            closed = outcome.closed.len(),
            discarded_failures = outcome.discarded_failures,
            "folded snapshot file into survival state"
        );
        Ok(outcome)
    }

    /// Right-censored survivors: serials still `ALIVE`, sorted by serial.
    #[must_use]
    pub fn open_watermarks(&self) -> Vec<(String, NaiveDate)> {
        let mut open: Vec<(String, NaiveDate)> = self
            .watermarks
            .iter()
            .map(|(serial, since)| (serial.clone(), *since))
            .collect();
        open.sort();
        open
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.watermarks.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
