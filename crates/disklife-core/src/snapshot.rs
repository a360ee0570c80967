//! Daily snapshot discovery and parsing.
//!
//! A snapshot directory holds one delimited file per day, named
//! `YYYY-MM-DD.<ext>`. Each file starts with a header; the required columns
//! are located by name and every `<prefix>_<n>_normalized|raw` column is a
//! diagnostic attribute. Other columns are ignored.
//!
//! ```text
//! date,serial_number,model,capacity_bytes,failure,smart_1_normalized,smart_1_raw,...
//! 2020-01-01,ZA1FLE1P,ST8000NM0055,8001563222016,0,82,152918560,...
//! ```
//!
//! [`SnapshotReader`] yields rows lazily with one reusable record buffer, so
//! memory is bounded by the column count, not the row count. Any malformed
//! record surfaces as a [`SnapshotError`]; nothing is coerced to a default.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SnapshotError};
use crate::{Error, Result};

/// Format of the date encoded in snapshot file names.
pub const FILE_DATE_FORMAT: &str = "%Y-%m-%d";

pub const SERIAL_COLUMN: &str = "serial_number";
pub const MODEL_COLUMN: &str = "model";
pub const CAPACITY_COLUMN: &str = "capacity_bytes";
pub const FAILURE_COLUMN: &str = "failure";

/// Highest attribute index carried by the source data.
pub const MAX_ATTRIBUTE_INDEX: u8 = 255;

// =============================================================================
// Attribute keys
// =============================================================================

/// Which reading of an attribute a column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Normalized,
    Raw,
}

impl AttributeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normalized => "normalized",
            Self::Raw => "raw",
        }
    }
}

/// Identifier of one diagnostic attribute column.
///
/// Orders by index, then `normalized` before `raw`, which is the column order
/// of every table this crate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeKey {
    pub index: u8,
    pub kind: AttributeKind,
}

impl AttributeKey {
    #[must_use]
    pub const fn new(index: u8, kind: AttributeKind) -> Self {
        Self { index, kind }
    }

    #[must_use]
    pub const fn normalized(index: u8) -> Self {
        Self::new(index, AttributeKind::Normalized)
    }

    #[must_use]
    pub const fn raw(index: u8) -> Self {
        Self::new(index, AttributeKind::Raw)
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.index, self.kind.as_str())
    }
}

static DEFAULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^smart_(\d{1,3})_(normalized|raw)$").expect("default attribute pattern")
});

/// Maps header names to [`AttributeKey`]s and back for a configured prefix.
#[derive(Debug, Clone)]
pub struct AttributeNaming {
    prefix: String,
    pattern: Regex,
}

impl AttributeNaming {
    pub fn new(prefix: &str) -> std::result::Result<Self, ConfigError> {
        let pattern = Regex::new(&format!(
            r"^{}_(\d{{1,3}})_(normalized|raw)$",
            regex::escape(prefix)
        ))
        .map_err(|e| ConfigError::ValidationError(format!("attribute prefix {prefix:?}: {e}")))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse a header name; `None` for non-attribute columns.
    #[must_use]
    pub fn parse(&self, name: &str) -> Option<AttributeKey> {
        let caps = self.pattern.captures(name.trim())?;
        let index: u16 = caps.get(1)?.as_str().parse().ok()?;
        if index == 0 || index > u16::from(MAX_ATTRIBUTE_INDEX) {
            return None;
        }
        let kind = match caps.get(2)?.as_str() {
            "normalized" => AttributeKind::Normalized,
            _ => AttributeKind::Raw,
        };
        Some(AttributeKey::new(index as u8, kind))
    }

    /// Header name for a key, e.g. `smart_5_raw`.
    #[must_use]
    pub fn column_name(&self, key: AttributeKey) -> String {
        format!("{}_{key}", self.prefix)
    }
}

impl Default for AttributeNaming {
    fn default() -> Self {
        Self {
            prefix: "smart".to_string(),
            pattern: DEFAULT_PATTERN.clone(),
        }
    }
}

// =============================================================================
// Rows and files
// =============================================================================

/// One drive on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub date: NaiveDate,
    pub serial_number: String,
    pub model: String,
    pub capacity_bytes: i64,
    pub failure: bool,
    /// Present attribute values only; absent keys are simply missing.
    pub attributes: BTreeMap<AttributeKey, f64>,
}

/// A snapshot file placed in the ordered input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub date: NaiveDate,
}

impl SnapshotFile {
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// List the snapshot files of `dir` in ascending date order.
///
/// Files are sorted by name and every name must encode a date strictly later
/// than the previous one; anything else is an ordering violation, since the
/// folds would silently produce wrong watermarks on misordered input.
pub fn discover_snapshot_files(dir: &Path, extension: &str) -> Result<Vec<SnapshotFile>> {
    let mut names: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        names.push((name, path));
    }
    names.sort_by(|a, b| a.0.cmp(&b.0));

    if names.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "no *.{extension} snapshot files in {}",
            dir.display()
        ))
        .into());
    }

    let mut files: Vec<SnapshotFile> = Vec::with_capacity(names.len());
    for (name, path) in names {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let date = NaiveDate::parse_from_str(stem, FILE_DATE_FORMAT).map_err(|_| {
            Error::OrderingViolation(format!(
                "{name}: file name does not encode a YYYY-MM-DD date"
            ))
        })?;
        if let Some(prev) = files.last() {
            if date <= prev.date {
                return Err(Error::OrderingViolation(format!(
                    "{name} sorts after {} but its date {date} is not later than {}",
                    prev.display_name(),
                    prev.date
                )));
            }
        }
        files.push(SnapshotFile { path, date });
    }
    Ok(files)
}

// =============================================================================
// Reader
// =============================================================================

/// Column positions resolved from one file's header.
#[derive(Debug, Clone)]
pub struct SnapshotSchema {
    serial: usize,
    model: usize,
    capacity: usize,
    failure: usize,
    attributes: Vec<(usize, AttributeKey)>,
    prefix: String,
}

impl SnapshotSchema {
    pub fn from_header(
        source: &str,
        header: &csv::StringRecord,
        naming: &AttributeNaming,
    ) -> std::result::Result<Self, SnapshotError> {
        let find = |column: &'static str| {
            header
                .iter()
                .position(|h| h.trim() == column)
                .ok_or_else(|| SnapshotError::MissingColumn {
                    path: source.to_string(),
                    column,
                })
        };
        let serial = find(SERIAL_COLUMN)?;
        let model = find(MODEL_COLUMN)?;
        let capacity = find(CAPACITY_COLUMN)?;
        let failure = find(FAILURE_COLUMN)?;
        let attributes = header
            .iter()
            .enumerate()
            .filter_map(|(pos, name)| naming.parse(name).map(|key| (pos, key)))
            .collect();
        Ok(Self {
            serial,
            model,
            capacity,
            failure,
            attributes,
            prefix: naming.prefix().to_string(),
        })
    }

    /// Attribute columns this file carries, in header order.
    pub fn attribute_keys(&self) -> impl Iterator<Item = AttributeKey> + '_ {
        self.attributes.iter().map(|(_, key)| *key)
    }
}

/// Lazy, single-pass row iterator over one snapshot file.
pub struct SnapshotReader<R: Read = File> {
    source: String,
    date: NaiveDate,
    reader: csv::Reader<R>,
    schema: SnapshotSchema,
    record: csv::StringRecord,
    done: bool,
}

impl SnapshotReader<File> {
    /// Open a discovered snapshot file and resolve its header.
    pub fn open(
        file: &SnapshotFile,
        naming: &AttributeNaming,
    ) -> std::result::Result<Self, SnapshotError> {
        let source = file.path.display().to_string();
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&file.path)
            .map_err(|source_err| SnapshotError::Read {
                path: source.clone(),
                source: source_err,
            })?;
        Self::with_csv_reader(source, file.date, reader, naming)
    }
}

impl<R: Read> SnapshotReader<R> {
    /// Read rows from any byte source; `source` names it in errors.
    pub fn from_reader(
        source: impl Into<String>,
        date: NaiveDate,
        rdr: R,
        naming: &AttributeNaming,
    ) -> std::result::Result<Self, SnapshotError> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        Self::with_csv_reader(source.into(), date, reader, naming)
    }

    fn with_csv_reader(
        source: String,
        date: NaiveDate,
        mut reader: csv::Reader<R>,
        naming: &AttributeNaming,
    ) -> std::result::Result<Self, SnapshotError> {
        let header = reader
            .headers()
            .map_err(|e| SnapshotError::Read {
                path: source.clone(),
                source: e,
            })?
            .clone();
        let schema = SnapshotSchema::from_header(&source, &header, naming)?;
        Ok(Self {
            source,
            date,
            reader,
            schema,
            record: csv::StringRecord::new(),
            done: false,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &SnapshotSchema {
        &self.schema
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    fn parse_record(&self) -> std::result::Result<SnapshotRow, SnapshotError> {
        let record = &self.record;
        let line = record.position().map_or(0, |p| p.line());
        let field = |pos: usize| record.get(pos).unwrap_or("");

        let serial_number = field(self.schema.serial);
        if serial_number.is_empty() {
            return Err(SnapshotError::MalformedRow {
                path: self.source.clone(),
                line,
                reason: "empty serial_number".to_string(),
            });
        }

        let raw_capacity = field(self.schema.capacity);
        let capacity_bytes: i64 =
            raw_capacity
                .parse()
                .map_err(|_| SnapshotError::InvalidNumber {
                    path: self.source.clone(),
                    line,
                    column: CAPACITY_COLUMN.to_string(),
                    value: raw_capacity.to_string(),
                })?;

        let failure = match field(self.schema.failure) {
            "0" => false,
            "1" => true,
            other => {
                return Err(SnapshotError::InvalidFailureFlag {
                    path: self.source.clone(),
                    line,
                    value: other.to_string(),
                });
            }
        };

        let mut attributes = BTreeMap::new();
        for &(pos, key) in &self.schema.attributes {
            let raw = field(pos);
            if raw.is_empty() {
                continue;
            }
            let value: f64 = raw.parse().map_err(|_| SnapshotError::InvalidNumber {
                path: self.source.clone(),
                line,
                column: format!("{}_{key}", self.schema.prefix),
                value: raw.to_string(),
            })?;
            if !value.is_nan() {
                attributes.insert(key, value);
            }
        }

        Ok(SnapshotRow {
            date: self.date,
            serial_number: serial_number.to_string(),
            model: field(self.schema.model).to_string(),
            capacity_bytes,
            failure,
            attributes,
        })
    }
}

impl<R: Read> Iterator for SnapshotReader<R> {
    type Item = std::result::Result<SnapshotRow, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let row = self.parse_record();
                if row.is_err() {
                    self.done = true;
                }
                Some(row)
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(SnapshotError::Read {
                    path: self.source.clone(),
                    source: e,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn read_all(text: &str) -> Vec<std::result::Result<SnapshotRow, SnapshotError>> {
        SnapshotReader::from_reader("mem.csv", day(1), text.as_bytes(), &AttributeNaming::default())
            .unwrap()
            .collect()
    }

    #[test]
    fn naming_parses_attribute_columns() {
        let naming = AttributeNaming::default();
        assert_eq!(naming.parse("smart_5_raw"), Some(AttributeKey::raw(5)));
        assert_eq!(
            naming.parse("smart_255_normalized"),
            Some(AttributeKey::normalized(255))
        );
        assert_eq!(naming.parse("smart_0_raw"), None);
        assert_eq!(naming.parse("smart_256_raw"), None);
        assert_eq!(naming.parse("smart_5_cooked"), None);
        assert_eq!(naming.parse("datacenter"), None);
        assert_eq!(naming.parse("xsmart_5_raw"), None);
    }

    #[test]
    fn naming_honors_custom_prefix() {
        let naming = AttributeNaming::new("attr").unwrap();
        assert_eq!(naming.parse("attr_7_normalized"), Some(AttributeKey::normalized(7)));
        assert_eq!(naming.parse("smart_7_normalized"), None);
        assert_eq!(naming.column_name(AttributeKey::raw(7)), "attr_7_raw");
    }

    #[test]
    fn attribute_keys_order_by_index_then_kind() {
        let mut keys = vec![
            AttributeKey::raw(9),
            AttributeKey::normalized(194),
            AttributeKey::raw(1),
            AttributeKey::normalized(9),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                AttributeKey::raw(1),
                AttributeKey::normalized(9),
                AttributeKey::raw(9),
                AttributeKey::normalized(194),
            ]
        );
    }

    #[test]
    fn reads_rows_with_sparse_attributes() {
        let rows = read_all(
            "date,serial_number,model,capacity_bytes,failure,datacenter,smart_1_normalized,smart_1_raw\n\
             2020-01-01,S1,M1,4000,0,phx1,100,5\n\
             2020-01-01,S2,M2,8000,1,phx1,,7\n",
        );
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.serial_number, "S1");
        assert_eq!(first.model, "M1");
        assert_eq!(first.capacity_bytes, 4000);
        assert!(!first.failure);
        assert_eq!(first.date, day(1));
        assert_eq!(first.attributes.get(&AttributeKey::normalized(1)), Some(&100.0));
        let second = rows[1].as_ref().unwrap();
        assert!(second.failure);
        assert!(!second.attributes.contains_key(&AttributeKey::normalized(1)));
        assert_eq!(second.attributes.get(&AttributeKey::raw(1)), Some(&7.0));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let err = SnapshotReader::from_reader(
            "mem.csv",
            day(1),
            "date,serial_number,model,capacity_bytes\n".as_bytes(),
            &AttributeNaming::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            SnapshotError::MissingColumn {
                column: FAILURE_COLUMN,
                ..
            }
        ));
    }

    #[test]
    fn invalid_failure_flag_stops_iteration() {
        let rows = read_all(
            "serial_number,model,capacity_bytes,failure\n\
             S1,M,1,yes\n\
             S2,M,1,0\n",
        );
        assert_eq!(rows.len(), 1);
        let err = rows[0].as_ref().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFailureFlag { line: 2, .. }));
    }

    #[test]
    fn non_numeric_attribute_is_malformed() {
        let rows = read_all(
            "serial_number,model,capacity_bytes,failure,smart_9_raw\n\
             S1,M,1,0,abc\n",
        );
        let err = rows[0].as_ref().unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidNumber { .. }));
    }

    #[test]
    fn empty_serial_is_malformed() {
        let rows = read_all("serial_number,model,capacity_bytes,failure\n,M,1,0\n");
        assert!(matches!(
            rows[0].as_ref().unwrap_err(),
            SnapshotError::MalformedRow { .. }
        ));
    }

    #[test]
    fn ragged_record_is_read_error() {
        let rows = read_all("serial_number,model,capacity_bytes,failure\nS1,M,1\n");
        assert!(matches!(rows[0].as_ref().unwrap_err(), SnapshotError::Read { .. }));
    }

    #[test]
    fn negative_capacity_is_carried_verbatim() {
        let rows = read_all("serial_number,model,capacity_bytes,failure\nS1,M,-1,0\n");
        assert_eq!(rows[0].as_ref().unwrap().capacity_bytes, -1);
    }

    #[test]
    fn discovery_sorts_and_filters() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["2020-01-03.csv", "2020-01-01.csv", "2020-01-02.csv", "notes.txt"] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("nested.csv")).unwrap();
        let files = discover_snapshot_files(tmp.path(), "csv").unwrap();
        let dates: Vec<_> = files.iter().map(|f| f.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(files[0].display_name(), "2020-01-01.csv");
    }

    #[test]
    fn discovery_rejects_undated_names() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("2020-01-01.csv"), "x").unwrap();
        std::fs::write(tmp.path().join("latest.csv"), "x").unwrap();
        let err = discover_snapshot_files(tmp.path(), "csv").unwrap_err();
        assert!(matches!(err, Error::OrderingViolation(_)));
    }

    #[test]
    fn discovery_rejects_lexical_chronological_mismatch() {
        let tmp = tempfile::TempDir::new().unwrap();
        // "2020-1-9" sorts after "2020-1-10" lexically but is earlier.
        std::fs::write(tmp.path().join("2020-1-10.csv"), "x").unwrap();
        std::fs::write(tmp.path().join("2020-1-9.csv"), "x").unwrap();
        let err = discover_snapshot_files(tmp.path(), "csv").unwrap_err();
        assert!(matches!(err, Error::OrderingViolation(_)));
    }

    #[test]
    fn discovery_of_empty_dir_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(discover_snapshot_files(tmp.path(), "csv").is_err());
    }
}
