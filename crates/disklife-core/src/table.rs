//! Feature table encoding.
//!
//! The feature table is the deliverable of the feature pass and the format of
//! every checkpoint:
//!
//! ```text
//! serial_number,model,capacity_bytes,hard_live_cost,smart_1_normalized,smart_1_raw,...
//! ZA1FLE1P,ST8000NM0055,8001563222016,2003,82,152918560,...
//! ```
//!
//! Null attributes are empty fields. Tables are written through a temp file
//! and renamed into place, and the SHA-256 of the bytes is computed while
//! writing.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::Result;
use crate::error::StorageError;
use crate::snapshot::{
    AttributeKey, AttributeNaming, CAPACITY_COLUMN, MODEL_COLUMN, SERIAL_COLUMN,
};
use crate::store::{DriveRecord, StateStore, StoreSnapshot};

pub const COST_COLUMN: &str = "hard_live_cost";

/// Summary of a table written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDigest {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub sha256: String,
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode a snapshot as CSV into any writer.
pub fn write_feature_table<W: Write>(
    out: W,
    snapshot: &StoreSnapshot,
    naming: &AttributeNaming,
) -> std::result::Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<String> = vec![
        SERIAL_COLUMN.to_string(),
        MODEL_COLUMN.to_string(),
        CAPACITY_COLUMN.to_string(),
        COST_COLUMN.to_string(),
    ];
    header.extend(snapshot.columns.iter().map(|k| naming.column_name(*k)));
    writer.write_record(&header)?;

    let mut fields: Vec<String> = Vec::with_capacity(header.len());
    for record in &snapshot.records {
        fields.clear();
        fields.push(record.serial_number.clone());
        fields.push(record.model.clone());
        fields.push(record.capacity_bytes.to_string());
        fields.push(record.hard_live_cost.to_string());
        for key in &snapshot.columns {
            fields.push(record.attribute(*key).map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a snapshot to `path` atomically and return its digest.
pub fn persist_feature_table(
    path: &Path,
    snapshot: &StoreSnapshot,
    naming: &AttributeNaming,
) -> io::Result<TableDigest> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_path_for(path);
    let file = File::create(&tmp_path)?;
    let mut hashing = HashingWriter {
        inner: BufWriter::new(file),
        hasher: Sha256::new(),
    };
    let written = write_feature_table(&mut hashing, snapshot, naming)
        .map_err(io::Error::from)
        .and_then(|()| hashing.flush())
        .and_then(|()| hashing.inner.get_ref().sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    let sha256 = hex::encode(hashing.hasher.finalize());
    drop(hashing.inner);
    fs::rename(&tmp_path, path)?;

    Ok(TableDigest {
        path: path.to_path_buf(),
        rows: snapshot.len(),
        columns: snapshot.columns.len(),
        sha256,
    })
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a feature table back into a store. Records come back with no
/// failure marker.
pub fn read_feature_table(path: &Path, naming: &AttributeNaming) -> Result<StateStore> {
    let display = path.display().to_string();
    let table_err = |reason: String| StorageError::Table {
        path: display.clone(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let header = reader.headers()?.clone();
    let find = |column: &str| {
        header
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| table_err(format!("missing column {column}")))
    };
    let serial_pos = find(SERIAL_COLUMN)?;
    let model_pos = find(MODEL_COLUMN)?;
    let capacity_pos = find(CAPACITY_COLUMN)?;
    let cost_pos = find(COST_COLUMN)?;
    let attribute_cols: Vec<(usize, AttributeKey)> = header
        .iter()
        .enumerate()
        .filter_map(|(pos, name)| naming.parse(name).map(|key| (pos, key)))
        .collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result?;
        let line = row.position().map_or(0, |p| p.line());
        let field = |pos: usize| row.get(pos).unwrap_or("");

        let capacity_bytes: i64 = field(capacity_pos)
            .parse()
            .map_err(|_| table_err(format!("line {line}: bad {CAPACITY_COLUMN}")))?;
        let hard_live_cost: u64 = field(cost_pos)
            .parse()
            .map_err(|_| table_err(format!("line {line}: bad {COST_COLUMN}")))?;

        let mut record = DriveRecord::new(field(serial_pos), field(model_pos), capacity_bytes);
        record.hard_live_cost = hard_live_cost;
        for &(pos, key) in &attribute_cols {
            let raw = field(pos);
            if raw.is_empty() {
                continue;
            }
            let value: f64 = raw
                .parse()
                .map_err(|_| table_err(format!("line {line}: bad value for {key}")))?;
            record.attributes.insert(key, value);
        }
        records.push(record);
    }

    let mut store = StateStore::new();
    store
        .apply_batch(attribute_cols.iter().map(|(_, key)| *key), records)
        .map_err(|e| table_err(e.to_string()))?;
    Ok(store)
}

/// Initial store for the feature pass: the seed table when one is configured
/// and present, otherwise empty.
pub fn load_seed(path: Option<&Path>, naming: &AttributeNaming) -> Result<StateStore> {
    match path {
        Some(path) if path.exists() => {
            let store = read_feature_table(path, naming)?;
            info!(
                path = %path.display(),
                records = store.len(),
                columns = store.columns().len(),
                "seeded feature store"
            );
            Ok(store)
        }
        Some(path) => {
            info!(path = %path.display(), "seed table not found, starting empty");
            Ok(StateStore::new())
        }
        None => Ok(StateStore::new()),
    }
}
