//! End-to-end passes over a snapshot directory.
//!
//! ```text
//!                 ┌──▶ AggregationEngine ──▶ checkpoints, feature table
//! discover files ─┤
//!                 └──▶ IntervalExtractor ──▶ failure_info ──▶ statistics table
//! ```
//!
//! The two passes read the same ordered file list independently and share
//! no state; [`run_all`] runs them side by side on the blocking pool.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::AggregationEngine;
use crate::checkpoint::{CheckpointManager, CheckpointStats};
use crate::config::{Config, MalformedFilePolicy};
use crate::interval_store::IntervalStore;
use crate::snapshot::{AttributeNaming, SnapshotFile, SnapshotReader, discover_snapshot_files};
use crate::survival::IntervalExtractor;
use crate::survival_stats::{ModelSurvivalStat, truncated_mean_by_model, write_statistics};
use crate::table::{TableDigest, load_seed, persist_feature_table};
use crate::{Error, Result};

/// A file whose contribution was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub date: NaiveDate,
    pub line: Option<u64>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRunReport {
    pub files: usize,
    pub folded: usize,
    pub skipped: Vec<SkippedFile>,
    pub rows: usize,
    pub created: usize,
    pub new_failures: usize,
    pub censored: usize,
    pub skipped_terminal_newcomers: usize,
    pub drives: usize,
    pub checkpoints: CheckpointStats,
    pub output: TableDigest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalRunReport {
    pub files: usize,
    pub folded: usize,
    pub skipped: Vec<SkippedFile>,
    pub rows: usize,
    pub intervals_appended: usize,
    pub discarded_failures: usize,
    /// Serials still alive at the end of input (right-censored).
    pub open_watermarks: usize,
    pub statistics: Vec<ModelSurvivalStat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub features: FeatureRunReport,
    pub survival: SurvivalRunReport,
}

struct PassInput {
    naming: AttributeNaming,
    files: Vec<SnapshotFile>,
}

fn prepare(config: &Config) -> Result<PassInput> {
    config.validate()?;
    let naming = AttributeNaming::new(&config.input.attribute_prefix)?;
    let files = discover_snapshot_files(&config.input.dir, &config.input.extension)?;
    Ok(PassInput { naming, files })
}

/// Apply the malformed-file policy to a failed fold.
fn absorb_file_error(
    pass: &'static str,
    policy: MalformedFilePolicy,
    file: &SnapshotFile,
    error: Error,
    skipped: &mut Vec<SkippedFile>,
) -> Result<()> {
    if !error.is_malformed_file() || policy == MalformedFilePolicy::FailFast {
        return Err(error);
    }
    let line = match &error {
        Error::Snapshot(e) => e.line(),
        _ => None,
    };
    warn!(
        pass,
        file = %file.display_name(),
        date = %file.date,
        line = line.unwrap_or(0),
        error = %error,
        "skipping malformed snapshot file"
    );
    skipped.push(SkippedFile {
        file: file.display_name(),
        date: file.date,
        line,
        error: error.to_string(),
    });
    Ok(())
}

/// Feature pass: fold every file into the store, checkpoint on cadence and
/// write the final feature table.
pub fn run_features(config: &Config) -> Result<FeatureRunReport> {
    let PassInput { naming, files } = prepare(config)?;
    let span = crate::pass_span!("features", files = files.len() as u64);
    let _guard = span.enter();

    let store = load_seed(config.input.seed_features_path.as_deref(), &naming)?;
    let mut engine = AggregationEngine::with_store(store, &config.features);
    let mut checkpoints = CheckpointManager::new(&config.checkpoint, naming.clone());

    let mut skipped = Vec::new();
    let (mut folded, mut rows, mut created, mut new_failures, mut censored, mut newcomers) =
        (0, 0, 0, 0, 0, 0);
    let total = files.len();
    for (idx, file) in files.iter().enumerate() {
        let processed = idx + 1;
        let is_last = processed == total;
        let result = SnapshotReader::open(file, &naming)
            .map_err(Error::from)
            .and_then(|reader| engine.fold_reader(reader, is_last));
        match result {
            Ok(outcome) => {
                folded += 1;
                rows += outcome.rows;
                created += outcome.created;
                new_failures += outcome.new_failures;
                censored += outcome.censored;
                newcomers += outcome.skipped_terminal_newcomers;
            }
            Err(error) => absorb_file_error(
                "features",
                config.input.malformed_files,
                file,
                error,
                &mut skipped,
            )?,
        }
        checkpoints.maybe_checkpoint(processed, file.date, engine.store());
    }
    let checkpoint_stats = checkpoints.finish();

    let snapshot = engine.store().snapshot();
    let output = persist_feature_table(&config.output.features_path, &snapshot, &naming)?;

    info!(
        files = total,
        folded,
        skipped = skipped.len(),
        drives = snapshot.len(),
        columns = snapshot.columns.len(),
        checkpoints_written = checkpoint_stats.written,
        checkpoints_failed = checkpoint_stats.failed,
        path = %output.path.display(),
        "feature pass complete"
    );

    Ok(FeatureRunReport {
        files: total,
        folded,
        skipped,
        rows,
        created,
        new_failures,
        censored,
        skipped_terminal_newcomers: newcomers,
        drives: snapshot.len(),
        checkpoints: checkpoint_stats,
        output,
    })
}

/// Survival pass: extract failure intervals, append them to the interval
/// store and compute per-model statistics over everything stored.
pub fn run_survival(config: &Config) -> Result<SurvivalRunReport> {
    let PassInput { naming, files } = prepare(config)?;
    let span = crate::pass_span!("survival", files = files.len() as u64);
    let _guard = span.enter();

    let mut intervals = IntervalStore::open(&config.output.intervals_db)?;
    if config.output.reset_intervals {
        let removed = intervals.truncate()?;
        info!(removed, "cleared stored failure intervals");
    }

    let mut extractor = IntervalExtractor::new();
    let mut skipped = Vec::new();
    let (mut folded, mut rows, mut appended, mut discarded) = (0, 0, 0, 0);
    for file in &files {
        let result = SnapshotReader::open(file, &naming)
            .map_err(Error::from)
            .and_then(|reader| extractor.fold_reader(reader));
        match result {
            Ok(outcome) => {
                appended += intervals.append_batch(&outcome.closed)?;
                folded += 1;
                rows += outcome.rows;
                discarded += outcome.discarded_failures;
            }
            Err(error) => absorb_file_error(
                "survival",
                config.input.malformed_files,
                file,
                error,
                &mut skipped,
            )?,
        }
    }

    let stored = intervals.load_all()?;
    let statistics = truncated_mean_by_model(
        &stored,
        config.statistics.percentile,
        config.statistics.scope,
    )?;
    write_statistics(&config.output.statistics_path, &statistics)?;

    info!(
        files = files.len(),
        folded,
        skipped = skipped.len(),
        intervals_appended = appended,
        intervals_stored = stored.len(),
        open_watermarks = extractor.open_count(),
        models = statistics.len(),
        "survival pass complete"
    );

    Ok(SurvivalRunReport {
        files: files.len(),
        folded,
        skipped,
        rows,
        intervals_appended: appended,
        discarded_failures: discarded,
        open_watermarks: extractor.open_count(),
        statistics,
    })
}

/// Run both passes concurrently.
pub async fn run_all(config: &Config) -> Result<RunReport> {
    config.validate()?;
    let features_config = config.clone();
    let survival_config = config.clone();

    let features = tokio::task::spawn_blocking(move || run_features(&features_config));
    let survival = tokio::task::spawn_blocking(move || run_survival(&survival_config));
    let (features, survival) = tokio::join!(features, survival);

    let features = features.map_err(|e| Error::Runtime(format!("task join: {e}")))??;
    let survival = survival.map_err(|e| Error::Runtime(format!("task join: {e}")))??;
    Ok(RunReport { features, survival })
}
