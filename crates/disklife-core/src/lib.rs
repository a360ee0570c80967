//! disklife-core: survival targets and features from daily drive snapshots
//!
//! Reads a directory of per-day drive health snapshots and derives two
//! things from it: a per-drive feature/target table (last-known attribute
//! values plus a censored survival counter, `hard_live_cost`) and a record of
//! closed failure intervals summarised as a truncated mean per model.
//!
//! # Architecture
//!
//! ```text
//! snapshot dir ──▶ SnapshotReader ──┬──▶ AggregationEngine ──▶ StateStore ──▶ feature table
//!  (YYYY-MM-DD.csv)                 │          └──▶ CheckpointManager
//!                                   └──▶ IntervalExtractor ──▶ IntervalStore ──▶ statistics
//! ```
//!
//! # Modules
//!
//! - `snapshot`: file discovery, header resolution, lazy row parsing
//! - `store`: per-drive records and the attribute column set
//! - `aggregate`: per-file feature fold with whole-file atomicity
//! - `checkpoint`: periodic best-effort table snapshots
//! - `table`: feature table encoding, seed loading
//! - `survival`: alive/failed state machine producing failure intervals
//! - `interval_store`: SQLite `failure_info` table
//! - `survival_stats`: truncated mean survival per model
//! - `pipeline`: the two passes end to end
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod interval_store;
pub mod logging;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod survival;
pub mod survival_stats;
pub mod table;

pub use error::{Error, Result, StorageError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
