//! Truncated-mean survival duration per drive model.
//!
//! For each model the intervals are ranked by duration ascending and only the
//! first `ceil(n * percentile)` are averaged, i.e. the fastest-failing share
//! of that model's drives. With `RankScope::Global` all intervals are ranked
//! at once and the first `floor(n * percentile)` are kept before grouping by
//! model, which can leave no rows at all for a small percentile.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::{RankScope, validate_percentile};
use crate::error::ConfigError;
use crate::survival::FailureInterval;

/// Slack for `n * p` landing a hair above an integer through float error.
const CUTOFF_EPSILON: f64 = 1e-9;

/// One output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSurvivalStat {
    pub model: String,
    pub truncated_mean_days: f64,
    /// Intervals that fell under the cutoff.
    pub included: usize,
    /// All intervals of this model.
    pub total: usize,
}

/// Number of ranked rows kept out of `n` for one model.
#[must_use]
pub fn cutoff_rank(n: usize, percentile: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let raw = (n as f64 * percentile - CUTOFF_EPSILON).ceil();
    (raw.max(1.0) as usize).min(n)
}

/// Rows kept out of `n` when ranking across all models: `row_num <= n * p`.
#[must_use]
pub fn global_cutoff_rank(n: usize, percentile: f64) -> usize {
    let raw = (n as f64 * percentile + CUTOFF_EPSILON).floor();
    (raw.max(0.0) as usize).min(n)
}

fn ranked(mut intervals: Vec<&FailureInterval>) -> Vec<&FailureInterval> {
    intervals.sort_by(|a, b| {
        a.duration_days()
            .total_cmp(&b.duration_days())
            .then_with(|| a.start_date.cmp(&b.start_date))
            .then_with(|| a.serial_number.cmp(&b.serial_number))
    });
    intervals
}

fn mean_days(intervals: &[&FailureInterval]) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }
    intervals.iter().map(|i| i.duration_days()).sum::<f64>() / intervals.len() as f64
}

/// Compute one [`ModelSurvivalStat`] per model, sorted by model.
pub fn truncated_mean_by_model(
    intervals: &[FailureInterval],
    percentile: f64,
    scope: RankScope,
) -> std::result::Result<Vec<ModelSurvivalStat>, ConfigError> {
    validate_percentile(percentile)?;

    let mut by_model: BTreeMap<&str, Vec<&FailureInterval>> = BTreeMap::new();
    for interval in intervals {
        by_model.entry(interval.model.as_str()).or_default().push(interval);
    }

    let stats = match scope {
        RankScope::PerModel => by_model
            .into_iter()
            .map(|(model, group)| {
                let total = group.len();
                let ranked = ranked(group);
                let kept = &ranked[..cutoff_rank(total, percentile)];
                ModelSurvivalStat {
                    model: model.to_string(),
                    truncated_mean_days: mean_days(kept),
                    included: kept.len(),
                    total,
                }
            })
            .collect(),
        RankScope::Global => {
            let all = ranked(intervals.iter().collect());
            let kept = &all[..global_cutoff_rank(all.len(), percentile)];
            let mut included: BTreeMap<&str, Vec<&FailureInterval>> = BTreeMap::new();
            for &interval in kept {
                included.entry(interval.model.as_str()).or_default().push(interval);
            }
            included
                .into_iter()
                .map(|(model, group)| ModelSurvivalStat {
                    model: model.to_string(),
                    truncated_mean_days: mean_days(&group),
                    included: group.len(),
                    total: by_model.get(model).map_or(0, Vec::len),
                })
                .collect()
        }
    };
    Ok(stats)
}

/// Write the statistics table atomically.
pub fn write_statistics(path: &Path, stats: &[ModelSurvivalStat]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)?;
        if stats.is_empty() {
            writer.write_record(["model", "truncated_mean_days", "included", "total"])?;
        }
        for stat in stats {
            writer.serialize(stat)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
