//! Periodic best-effort persistence of the feature store.
//!
//! After every `every`-th processed file the manager writes
//! `features_checkpoint_<n>.csv` (same schema as the final table) and a JSON
//! manifest beside it. A failed write is logged and counted; it never stops
//! ingestion. Checkpoints are not read back automatically.
//!
//! With `background = true` the snapshot is taken between files on the
//! ingest thread and handed to a dedicated writer thread over a bounded
//! channel, so the writer never sees a store mid-mutation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, NaiveDate, Utc};
use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::error::CheckpointError;
use crate::snapshot::AttributeNaming;
use crate::store::{StateStore, StoreSnapshot};
use crate::table::persist_feature_table;

/// Sidecar describing one checkpoint table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// 1-based count of checkpoints taken in this run.
    pub seq: usize,
    pub last_file_date: NaiveDate,
    pub files_processed: usize,
    pub rows: usize,
    pub columns: usize,
    pub table: PathBuf,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Counters reported when the manager is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub written: usize,
    pub failed: usize,
}

#[must_use]
pub fn checkpoint_table_path(dir: &Path, files_processed: usize) -> PathBuf {
    dir.join(format!("features_checkpoint_{files_processed:06}.csv"))
}

#[must_use]
pub fn checkpoint_manifest_path(dir: &Path, files_processed: usize) -> PathBuf {
    dir.join(format!("features_checkpoint_{files_processed:06}.json"))
}

struct CheckpointJob {
    seq: usize,
    last_file_date: NaiveDate,
    files_processed: usize,
    snapshot: StoreSnapshot,
}

/// Write one checkpoint table plus manifest.
fn write_checkpoint(
    dir: &Path,
    naming: &AttributeNaming,
    job: &CheckpointJob,
) -> Result<CheckpointManifest, CheckpointError> {
    let table_path = checkpoint_table_path(dir, job.files_processed);
    let digest = persist_feature_table(&table_path, &job.snapshot, naming).map_err(|source| {
        CheckpointError::Write {
            path: table_path.display().to_string(),
            source,
        }
    })?;

    let manifest = CheckpointManifest {
        seq: job.seq,
        last_file_date: job.last_file_date,
        files_processed: job.files_processed,
        rows: digest.rows,
        columns: digest.columns,
        table: table_path,
        sha256: digest.sha256,
        created_at: Utc::now(),
    };

    let manifest_path = checkpoint_manifest_path(dir, job.files_processed);
    let content = serde_json::to_vec_pretty(&manifest).map_err(|e| CheckpointError::Encode {
        path: manifest_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let tmp_path = manifest_path.with_extension("json.tmp");
    fs::write(&tmp_path, content)
        .and_then(|()| fs::rename(&tmp_path, &manifest_path))
        .map_err(|source| CheckpointError::Write {
            path: manifest_path.display().to_string(),
            source,
        })?;
    Ok(manifest)
}

/// Shared between the manager and its writer thread.
#[derive(Debug, Default)]
struct Counters {
    written: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record(&self, result: &Result<CheckpointManifest, CheckpointError>) {
        match result {
            Ok(manifest) => {
                self.written.fetch_add(1, Ordering::SeqCst);
                info!(
                    seq = manifest.seq,
                    files_processed = manifest.files_processed,
                    rows = manifest.rows,
                    path = %manifest.table.display(),
                    "checkpoint written"
                );
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(error = %error, "checkpoint write failed, continuing");
            }
        }
    }

    fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            written: self.written.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

struct BackgroundWriter {
    tx: Sender<CheckpointJob>,
    handle: JoinHandle<()>,
}

/// Decides when to checkpoint and carries out the writes.
pub struct CheckpointManager {
    every: usize,
    dir: PathBuf,
    naming: Arc<AttributeNaming>,
    seq: usize,
    counters: Arc<Counters>,
    background: Option<BackgroundWriter>,
}

impl CheckpointManager {
    /// Build a manager. A background writer thread is started when
    /// configured; if the thread cannot be spawned, writes happen inline.
    #[must_use]
    pub fn new(config: &CheckpointConfig, naming: AttributeNaming) -> Self {
        let naming = Arc::new(naming);
        let counters = Arc::new(Counters::default());
        let background = if config.background && config.every > 0 {
            spawn_writer(config.dir.clone(), Arc::clone(&naming), Arc::clone(&counters))
        } else {
            None
        };
        Self {
            every: config.every,
            dir: config.dir.clone(),
            naming,
            seq: 0,
            counters,
            background,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.every > 0
    }

    /// Whether the n-th processed file triggers a checkpoint.
    #[must_use]
    pub fn is_due(&self, files_processed: usize) -> bool {
        self.every > 0 && files_processed > 0 && files_processed % self.every == 0
    }

    /// Checkpoint `store` if `files_processed` lands on the cadence.
    /// Returns whether a checkpoint was attempted.
    pub fn maybe_checkpoint(
        &mut self,
        files_processed: usize,
        last_file_date: NaiveDate,
        store: &StateStore,
    ) -> bool {
        if !self.is_due(files_processed) {
            return false;
        }
        self.seq += 1;
        let job = CheckpointJob {
            seq: self.seq,
            last_file_date,
            files_processed,
            snapshot: store.snapshot(),
        };

        if let Some(writer) = &self.background {
            debug!(seq = job.seq, files_processed, "queueing checkpoint");
            if writer.tx.send(job).is_err() {
                self.counters.record(&Err(CheckpointError::WriterGone));
            }
            return true;
        }

        let result = write_checkpoint(&self.dir, &self.naming, &job);
        self.counters.record(&result);
        true
    }

    /// Drain the background writer, if any, and report counts.
    #[must_use]
    pub fn finish(self) -> CheckpointStats {
        if let Some(BackgroundWriter { tx, handle }) = self.background {
            drop(tx);
            if handle.join().is_err() {
                warn!("checkpoint writer thread panicked");
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.counters.stats()
    }
}

fn spawn_writer(
    dir: PathBuf,
    naming: Arc<AttributeNaming>,
    counters: Arc<Counters>,
) -> Option<BackgroundWriter> {
    // One queued snapshot at most; the ingest thread blocks rather than
    // piling up full copies of the store.
    let (tx, rx) = channel::bounded::<CheckpointJob>(1);
    let spawned = thread::Builder::new()
        .name("disklife-checkpoint-writer".to_owned())
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                let result = write_checkpoint(&dir, &naming, &job);
                counters.record(&result);
            }
        });
    match spawned {
        Ok(handle) => Some(BackgroundWriter { tx, handle }),
        Err(error) => {
            warn!(error = %error, "could not start checkpoint writer, writing inline");
            None
        }
    }
}
