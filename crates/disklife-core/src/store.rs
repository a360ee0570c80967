//! In-memory per-drive state for the feature pass.
//!
//! The store owns one [`DriveRecord`] per serial number plus the union of
//! attribute columns seen so far. Attribute values are kept sparse: a record
//! with no entry for a known column reads as null, which is how schema growth
//! back-fills existing records without touching them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::snapshot::AttributeKey;

/// Accumulated state for one drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveRecord {
    pub serial_number: String,
    pub model: String,
    pub capacity_bytes: i64,
    /// Survival counter used as the regression target. Never below 1.
    pub hard_live_cost: u64,
    /// Last-known value per attribute column.
    pub attributes: BTreeMap<AttributeKey, f64>,
    /// Date of the first observed failure. Freezes `hard_live_cost` and is
    /// never exported with the feature table.
    #[serde(skip)]
    pub failed_on: Option<NaiveDate>,
}

impl DriveRecord {
    /// A freshly admitted drive.
    #[must_use]
    pub fn new(serial_number: impl Into<String>, model: impl Into<String>, capacity_bytes: i64) -> Self {
        Self {
            serial_number: serial_number.into(),
            model: model.into(),
            capacity_bytes,
            hard_live_cost: 1,
            attributes: BTreeMap::new(),
            failed_on: None,
        }
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed_on.is_some()
    }

    /// Value for `key`, `None` when never supplied.
    #[must_use]
    pub fn attribute(&self, key: AttributeKey) -> Option<f64> {
        self.attributes.get(&key).copied()
    }
}

/// Result of one [`StateStore::upsert_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub replaced: usize,
}

/// Exclusive, single-threaded owner of all drive records.
#[derive(Debug, Default)]
pub struct StateStore {
    records: HashMap<String, DriveRecord>,
    columns: BTreeSet<AttributeKey>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, serial_number: &str) -> Option<&DriveRecord> {
        self.records.get(serial_number)
    }

    #[must_use]
    pub fn contains(&self, serial_number: &str) -> bool {
        self.records.contains_key(serial_number)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Known attribute columns in output order.
    #[must_use]
    pub fn columns(&self) -> &BTreeSet<AttributeKey> {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriveRecord> {
        self.records.values()
    }

    /// Add columns to the schema; returns the keys that were new.
    pub fn ensure_attribute_columns<I>(&mut self, keys: I) -> Vec<AttributeKey>
    where
        I: IntoIterator<Item = AttributeKey>,
    {
        keys.into_iter().filter(|key| self.columns.insert(*key)).collect()
    }

    /// Insert or replace whole records.
    ///
    /// The batch is validated before anything is written, so a rejected
    /// batch leaves the store unchanged.
    pub fn upsert_batch<I>(&mut self, records: I) -> Result<UpsertSummary, StorageError>
    where
        I: IntoIterator<Item = DriveRecord>,
    {
        let batch: Vec<DriveRecord> = records.into_iter().collect();
        for record in &batch {
            self.validate(record, &BTreeSet::new())?;
        }
        Ok(self.commit(batch))
    }

    /// Grow the schema by `columns` and upsert `records` as one unit.
    ///
    /// Records are validated against the grown column set before either is
    /// applied; on error neither the records nor the columns change. Returns
    /// the keys that were new.
    pub fn apply_batch<K, I>(
        &mut self,
        columns: K,
        records: I,
    ) -> Result<(Vec<AttributeKey>, UpsertSummary), StorageError>
    where
        K: IntoIterator<Item = AttributeKey>,
        I: IntoIterator<Item = DriveRecord>,
    {
        let pending: BTreeSet<AttributeKey> = columns
            .into_iter()
            .filter(|key| !self.columns.contains(key))
            .collect();
        let batch: Vec<DriveRecord> = records.into_iter().collect();
        for record in &batch {
            self.validate(record, &pending)?;
        }

        self.columns.extend(pending.iter().copied());
        Ok((pending.into_iter().collect(), self.commit(batch)))
    }

    fn commit(&mut self, batch: Vec<DriveRecord>) -> UpsertSummary {
        let mut summary = UpsertSummary::default();
        for record in batch {
            match self.records.insert(record.serial_number.clone(), record) {
                Some(_) => summary.replaced += 1,
                None => summary.inserted += 1,
            }
        }
        summary
    }

    fn validate(
        &self,
        record: &DriveRecord,
        pending: &BTreeSet<AttributeKey>,
    ) -> Result<(), StorageError> {
        if record.serial_number.is_empty() {
            return Err(StorageError::InvalidRecord("empty serial_number".to_string()));
        }
        if record.hard_live_cost == 0 {
            return Err(StorageError::InvalidRecord(format!(
                "{}: hard_live_cost must be at least 1",
                record.serial_number
            )));
        }
        if let Some(key) = record
            .attributes
            .keys()
            .find(|k| !self.columns.contains(k) && !pending.contains(k))
        {
            return Err(StorageError::InvalidRecord(format!(
                "{}: attribute {key} is not a known column",
                record.serial_number
            )));
        }
        Ok(())
    }

    /// Owned point-in-time copy, records sorted by serial number.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut records: Vec<DriveRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        StoreSnapshot {
            records,
            columns: self.columns.iter().copied().collect(),
        }
    }
}

/// Consistent copy of the store, safe to hand to another thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub records: Vec<DriveRecord>,
    pub columns: Vec<AttributeKey>,
}

impl StoreSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn find(&self, serial_number: &str) -> Option<&DriveRecord> {
        self.records
            .binary_search_by(|r| r.serial_number.as_str().cmp(serial_number))
            .ok()
            .map(|idx| &self.records[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(serial: &str, key: AttributeKey, value: f64) -> DriveRecord {
        let mut record = DriveRecord::new(serial, "M", 100);
        record.attributes.insert(key, value);
        record
    }

    #[test]
    fn new_record_starts_at_cost_one() {
        let record = DriveRecord::new("S1", "M", -1);
        assert_eq!(record.hard_live_cost, 1);
        assert_eq!(record.capacity_bytes, -1);
        assert!(!record.has_failed());
    }

    #[test]
    fn ensure_columns_reports_only_new_keys() {
        let mut store = StateStore::new();
        let added = store.ensure_attribute_columns([AttributeKey::raw(5), AttributeKey::raw(9)]);
        assert_eq!(added.len(), 2);
        let added = store.ensure_attribute_columns([AttributeKey::raw(5), AttributeKey::normalized(1)]);
        assert_eq!(added, vec![AttributeKey::normalized(1)]);
        assert_eq!(store.columns().len(), 3);
    }

    #[test]
    fn upsert_inserts_and_replaces() {
        let mut store = StateStore::new();
        let summary = store
            .upsert_batch([DriveRecord::new("A", "M", 1), DriveRecord::new("B", "M", 1)])
            .unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 2, replaced: 0 });

        let mut updated = DriveRecord::new("A", "M", 1);
        updated.hard_live_cost = 7;
        let summary = store.upsert_batch([updated]).unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(store.get("A").unwrap().hard_live_cost, 7);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rejected_batch_leaves_store_unchanged() {
        let mut store = StateStore::new();
        store.ensure_attribute_columns([AttributeKey::raw(1)]);
        let good = record_with("A", AttributeKey::raw(1), 3.0);
        let bad = record_with("B", AttributeKey::raw(2), 3.0);
        let err = store.upsert_batch([good, bad]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn apply_batch_grows_columns_with_records() {
        let mut store = StateStore::new();
        store.ensure_attribute_columns([AttributeKey::raw(1)]);
        let (added, summary) = store
            .apply_batch(
                [AttributeKey::raw(1), AttributeKey::raw(2)],
                [record_with("A", AttributeKey::raw(2), 4.0)],
            )
            .unwrap();
        assert_eq!(added, vec![AttributeKey::raw(2)]);
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.columns().len(), 2);
    }

    #[test]
    fn rejected_apply_batch_keeps_columns() {
        let mut store = StateStore::new();
        store.ensure_attribute_columns([AttributeKey::raw(1)]);
        let good = record_with("A", AttributeKey::raw(2), 1.0);
        let bad = record_with("B", AttributeKey::raw(9), 1.0);
        let err = store
            .apply_batch([AttributeKey::raw(2)], [good, bad])
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
        assert!(store.is_empty());
        assert_eq!(
            store.columns().iter().copied().collect::<Vec<_>>(),
            vec![AttributeKey::raw(1)]
        );
    }

    #[test]
    fn zero_cost_is_invalid() {
        let mut store = StateStore::new();
        let mut record = DriveRecord::new("A", "M", 1);
        record.hard_live_cost = 0;
        assert!(store.upsert_batch([record]).is_err());
    }

    #[test]
    fn absent_attribute_reads_as_null_after_schema_growth() {
        let mut store = StateStore::new();
        store.upsert_batch([DriveRecord::new("A", "M", 1)]).unwrap();
        store.ensure_attribute_columns([AttributeKey::raw(194)]);
        assert_eq!(store.get("A").unwrap().attribute(AttributeKey::raw(194)), None);
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let mut store = StateStore::new();
        store
            .upsert_batch([
                DriveRecord::new("C", "M", 1),
                DriveRecord::new("A", "M", 1),
                DriveRecord::new("B", "M", 1),
            ])
            .unwrap();
        let snap = store.snapshot();
        let serials: Vec<_> = snap.records.iter().map(|r| r.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["A", "B", "C"]);

        let mut bumped = DriveRecord::new("A", "M", 1);
        bumped.hard_live_cost = 9;
        store.upsert_batch([bumped]).unwrap();
        assert_eq!(snap.find("A").unwrap().hard_live_cost, 1);
        assert!(snap.find("Z").is_none());
    }
}
