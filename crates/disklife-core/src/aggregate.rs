//! Feature pass: folds one snapshot file at a time into the [`StateStore`].
//!
//! Each call to [`AggregationEngine::fold_rows`] is all-or-nothing. Rows are
//! parsed and the resulting record changes are computed on copies first; the
//! store is only touched once the whole file has been read cleanly.
//!
//! Cost rules per drive:
//!
//! | Observation                           | `hard_live_cost`           |
//! |---------------------------------------|----------------------------|
//! | first seen (non-terminal file)        | 1                          |
//! | seen alive again (non-terminal file)  | +1                         |
//! | seen alive on the terminal file       | + censoring increment      |
//! | seen failed, or any time after that   | unchanged                  |
//!
//! Drives that first appear on the terminal file are not admitted.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use chrono::NaiveDate;
use tracing::debug;

use crate::Result;
use crate::config::{AttributeMergePolicy, FeatureConfig};
use crate::error::SnapshotError;
use crate::snapshot::{AttributeKey, SnapshotReader, SnapshotRow};
use crate::store::{DriveRecord, StateStore};

/// What one file did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutcome {
    pub date: Option<NaiveDate>,
    pub rows: usize,
    /// Rows whose serial already appeared earlier in the same file.
    pub duplicates: usize,
    pub known_updated: usize,
    pub created: usize,
    pub new_failures: usize,
    /// Survivors that received the censoring increment.
    pub censored: usize,
    pub skipped_terminal_newcomers: usize,
    pub new_columns: usize,
}

/// One serial's collapsed view of a file.
#[derive(Debug)]
struct Observation {
    model: String,
    capacity_bytes: i64,
    failure: bool,
    attributes: BTreeMap<AttributeKey, f64>,
}

impl Observation {
    fn from_row(row: SnapshotRow) -> Self {
        Self {
            model: row.model,
            capacity_bytes: row.capacity_bytes,
            failure: row.failure,
            attributes: row.attributes,
        }
    }

    /// Later rows for the same serial: failure is sticky, attributes merge in
    /// row order, identity fields stay from the first row.
    fn absorb(&mut self, row: SnapshotRow) {
        self.failure |= row.failure;
        self.attributes.extend(row.attributes);
    }
}

/// Owns the feature store and applies the per-file update rules.
#[derive(Debug)]
pub struct AggregationEngine {
    store: StateStore,
    censoring_increment: u64,
    merge: AttributeMergePolicy,
}

impl AggregationEngine {
    #[must_use]
    pub fn new(config: &FeatureConfig) -> Self {
        Self::with_store(StateStore::new(), config)
    }

    /// Start from an existing store, e.g. one loaded from a seed table.
    #[must_use]
    pub fn with_store(store: StateStore, config: &FeatureConfig) -> Self {
        Self {
            store,
            censoring_increment: config.censoring_increment,
            merge: config.attribute_merge,
        }
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> StateStore {
        self.store
    }

    /// Fold every row a reader yields.
    pub fn fold_reader<R: Read>(
        &mut self,
        reader: SnapshotReader<R>,
        is_last: bool,
    ) -> Result<FileOutcome> {
        let columns: Vec<AttributeKey> = reader.schema().attribute_keys().collect();
        let date = reader.date();
        self.fold_rows(date, &columns, reader, is_last)
    }

    /// Fold one file's rows. `columns` lists the attribute columns the file
    /// carries, whether or not any row fills them.
    pub fn fold_rows<I>(
        &mut self,
        date: NaiveDate,
        columns: &[AttributeKey],
        rows: I,
        is_last: bool,
    ) -> Result<FileOutcome>
    where
        I: IntoIterator<Item = std::result::Result<SnapshotRow, SnapshotError>>,
    {
        let mut outcome = FileOutcome {
            date: Some(date),
            ..FileOutcome::default()
        };

        let mut observations: HashMap<String, Observation> = HashMap::new();
        for row in rows {
            let row = row?;
            outcome.rows += 1;
            if let Some(existing) = observations.get_mut(&row.serial_number) {
                outcome.duplicates += 1;
                existing.absorb(row);
            } else {
                let serial = row.serial_number.clone();
                observations.insert(serial, Observation::from_row(row));
            }
        }

        let mut serials: Vec<String> = observations.keys().cloned().collect();
        serials.sort_unstable();

        let mut staged: Vec<DriveRecord> = Vec::with_capacity(serials.len());
        for serial in serials {
            let Some(obs) = observations.remove(&serial) else {
                continue;
            };
            let mut record = match self.store.get(&serial) {
                Some(existing) => {
                    let mut record = existing.clone();
                    if record.failed_on.is_none() {
                        if obs.failure {
                            record.failed_on = Some(date);
                            outcome.new_failures += 1;
                        } else if is_last {
                            record.hard_live_cost =
                                record.hard_live_cost.saturating_add(self.censoring_increment);
                            outcome.censored += 1;
                        } else {
                            record.hard_live_cost = record.hard_live_cost.saturating_add(1);
                        }
                    }
                    outcome.known_updated += 1;
                    record
                }
                None if is_last => {
                    outcome.skipped_terminal_newcomers += 1;
                    continue;
                }
                None => {
                    let mut record = DriveRecord::new(serial, obs.model.clone(), obs.capacity_bytes);
                    if obs.failure {
                        record.failed_on = Some(date);
                        outcome.new_failures += 1;
                    }
                    outcome.created += 1;
                    record
                }
            };
            self.merge_attributes(&mut record, columns, obs);
            staged.push(record);
        }

        let (new_columns, _) = self.store.apply_batch(columns.iter().copied(), staged)?;
        outcome.new_columns = new_columns.len();

        debug!(
            date = %date,
            rows = outcome.rows,
            known_updated = outcome.known_updated,
            created = outcome.created,
            new_failures = outcome.new_failures,
            new_columns = outcome.new_columns,
            is_last,
            "folded snapshot file into feature store"
        );
        Ok(outcome)
    }

    fn merge_attributes(&self, record: &mut DriveRecord, columns: &[AttributeKey], obs: Observation) {
        match self.merge {
            AttributeMergePolicy::LastKnown => record.attributes.extend(obs.attributes),
            AttributeMergePolicy::ColumnOverwrite => {
                for key in columns {
                    match obs.attributes.get(key) {
                        Some(value) => {
                            record.attributes.insert(*key, *value);
                        }
                        None => {
                            record.attributes.remove(key);
                        }
                    }
                }
            }
        }
    }
}
