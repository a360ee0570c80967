//! Shared test infrastructure for disklife-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::SnapshotDir;
//! ```

#![allow(dead_code)]

use std::fmt::Write;
use std::path::{Path, PathBuf};

use disklife_core::config::Config;
use tempfile::TempDir;

/// One drive row of a generated snapshot file.
#[derive(Debug, Clone)]
pub struct DayRow {
    pub serial: String,
    pub model: String,
    pub capacity: i64,
    pub failure: bool,
    /// `(index, raw value)` pairs written as `smart_<index>_raw`.
    pub raw: Vec<(u8, Option<f64>)>,
}

impl DayRow {
    pub fn alive(serial: &str, model: &str) -> Self {
        Self {
            serial: serial.to_string(),
            model: model.to_string(),
            capacity: 4_000_787_030_016,
            failure: false,
            raw: Vec::new(),
        }
    }

    pub fn failed(serial: &str, model: &str) -> Self {
        Self {
            failure: true,
            ..Self::alive(serial, model)
        }
    }

    pub fn with_raw(mut self, index: u8, value: Option<f64>) -> Self {
        self.raw.push((index, value));
        self
    }
}

/// Temp workspace holding a `data/` snapshot directory and output paths.
pub struct SnapshotDir {
    pub tmp: TempDir,
}

impl SnapshotDir {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("data")).expect("data dir");
        Self { tmp }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    /// Write `data/<date>.csv` with a header covering every raw index used.
    pub fn write_day(&self, date: &str, rows: &[DayRow]) {
        let mut indices: Vec<u8> = rows
            .iter()
            .flat_map(|r| r.raw.iter().map(|(i, _)| *i))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut text = String::from("date,serial_number,model,capacity_bytes,failure");
        for idx in &indices {
            write!(text, ",smart_{idx}_raw").unwrap();
        }
        text.push('\n');
        for row in rows {
            write!(
                text,
                "{date},{},{},{},{}",
                row.serial,
                row.model,
                row.capacity,
                u8::from(row.failure)
            )
            .unwrap();
            for idx in &indices {
                let value = row
                    .raw
                    .iter()
                    .find(|(i, _)| i == idx)
                    .and_then(|(_, v)| *v)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                write!(text, ",{value}").unwrap();
            }
            text.push('\n');
        }
        self.write_raw(&format!("{date}.csv"), &text);
    }

    pub fn write_raw(&self, name: &str, text: &str) {
        std::fs::write(self.data_dir().join(name), text).expect("write snapshot");
    }

    /// Config pointing every input and output into this workspace.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.input.dir = self.data_dir();
        config.checkpoint.dir = self.root().join("checkpoints");
        config.output.features_path = self.root().join("features.csv");
        config.output.intervals_db = self.root().join("database.sqlite");
        config.output.statistics_path = self.root().join("survival_statistics.csv");
        config
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.root().join(relative)).expect("read output")
    }
}

/// Parse the feature table into `(serial, cost, full row)` tuples.
pub fn feature_rows(text: &str) -> Vec<(String, u64, Vec<String>)> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    reader
        .records()
        .map(|r| {
            let r = r.expect("record");
            let fields: Vec<String> = r.iter().map(str::to_string).collect();
            (fields[0].clone(), fields[3].parse().expect("cost"), fields)
        })
        .collect()
}
