//! Pipeline configuration (`disklife.toml`).
//!
//! Every section is `#[serde(default)]`, so an empty file (or no file at all)
//! yields the documented defaults:
//!
//! ```toml
//! [input]
//! dir = "data"
//! extension = "csv"
//! attribute_prefix = "smart"
//! malformed_files = "skip"
//!
//! [features]
//! censoring_increment = 2000
//! attribute_merge = "last_known"
//!
//! [checkpoint]
//! every = 90
//! dir = "checkpoints_feature_compute"
//! background = false
//!
//! [output]
//! features_path = "computing_target_data.csv"
//! intervals_db = "database.sqlite"
//! statistics_path = "survival_statistics.csv"
//!
//! [statistics]
//! percentile = 0.9
//! scope = "per_model"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Increment applied to drives still alive in the terminal file.
pub const DEFAULT_CENSORING_INCREMENT: u64 = 2000;

/// Number of processed files between checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 90;

/// Fraction of fastest-failing drives kept by the truncated mean.
pub const DEFAULT_PERCENTILE: f64 = 0.9;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub features: FeatureConfig,
    pub checkpoint: CheckpointConfig,
    pub output: OutputConfig,
    pub statistics: StatisticsConfig,
    pub logging: LogConfig,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.features.censoring_increment == 0 {
            return Err(ConfigError::ValidationError(
                "features.censoring_increment must be greater than zero".to_string(),
            ));
        }
        validate_percentile(self.statistics.percentile)?;
        if self.input.extension.is_empty() || self.input.extension.contains('.') {
            return Err(ConfigError::ValidationError(format!(
                "input.extension must be a bare extension like \"csv\", got {:?}",
                self.input.extension
            )));
        }
        if self.input.attribute_prefix.is_empty()
            || !self
                .input
                .attribute_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ValidationError(format!(
                "input.attribute_prefix must be non-empty [A-Za-z0-9_], got {:?}",
                self.input.attribute_prefix
            )));
        }
        Ok(())
    }
}

/// Reject percentiles outside `(0, 1]`.
pub fn validate_percentile(percentile: f64) -> std::result::Result<(), ConfigError> {
    if percentile.is_finite() && percentile > 0.0 && percentile <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "statistics.percentile must lie in (0, 1], got {percentile}"
        )))
    }
}

/// What to do with a snapshot file that fails to parse or merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedFilePolicy {
    /// Drop the file's whole contribution, log it, continue with the next file.
    #[default]
    Skip,
    /// Abort the pass on the first malformed file.
    FailFast,
}

/// Input discovery and parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory holding one `YYYY-MM-DD.<extension>` file per day.
    pub dir: PathBuf,
    /// File extension of snapshot files; other files are ignored.
    pub extension: String,
    /// Prefix of diagnostic attribute columns (`<prefix>_<n>_normalized|raw`).
    pub attribute_prefix: String,
    /// Previously written feature table to resume from.
    pub seed_features_path: Option<PathBuf>,
    pub malformed_files: MalformedFilePolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            extension: "csv".to_string(),
            attribute_prefix: "smart".to_string(),
            seed_features_path: None,
            malformed_files: MalformedFilePolicy::Skip,
        }
    }
}

/// How a file's attribute values replace stored ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMergePolicy {
    /// Present values overwrite; absent values keep the stored one.
    #[default]
    LastKnown,
    /// Every attribute column the file carries overwrites, including with null.
    ColumnOverwrite,
}

/// Cost-update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Added to surviving drives on the terminal file instead of +1.
    pub censoring_increment: u64,
    pub attribute_merge: AttributeMergePolicy,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            censoring_increment: DEFAULT_CENSORING_INCREMENT,
            attribute_merge: AttributeMergePolicy::LastKnown,
        }
    }
}

/// Checkpoint cadence and destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Write a checkpoint after every `every` processed files (0 disables).
    pub every: usize,
    pub dir: PathBuf,
    /// Hand snapshots to a writer thread instead of writing inline.
    pub background: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every: DEFAULT_CHECKPOINT_EVERY,
            dir: PathBuf::from("checkpoints_feature_compute"),
            background: false,
        }
    }
}

/// Output destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Final feature/target table.
    pub features_path: PathBuf,
    /// SQLite database holding closed survival intervals.
    pub intervals_db: PathBuf,
    /// Per-model truncated-mean table.
    pub statistics_path: PathBuf,
    /// Clear previously stored intervals before the survival pass appends.
    pub reset_intervals: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            features_path: PathBuf::from("computing_target_data.csv"),
            intervals_db: PathBuf::from("database.sqlite"),
            statistics_path: PathBuf::from("survival_statistics.csv"),
            reset_intervals: false,
        }
    }
}

/// Which rows a model's percentile cutoff is ranked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankScope {
    /// Rank and cut off within each model.
    #[default]
    PerModel,
    /// Rank across all models and cut off against the global count, then group.
    Global,
}

/// Survival statistics parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub percentile: f64,
    pub scope: RankScope,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            percentile: DEFAULT_PERCENTILE,
            scope: RankScope::PerModel,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}
