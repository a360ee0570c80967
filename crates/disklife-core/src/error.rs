//! Error types for disklife-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a diagnostic command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for disklife-core
#[derive(Error, Debug)]
pub enum Error {
    /// A snapshot file could not be read or parsed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Interval store or feature table errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checkpoint persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Input files cannot be placed in a valid date sequence
    #[error("Input ordering violation: {0}")]
    OrderingViolation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited table errors outside snapshot parsing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Runtime errors (worker join failures, channel failures)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl Error {
    /// Whether this error condemns a single snapshot file rather than the run.
    ///
    /// The pipeline skips such files under the `skip` malformed-file policy.
    #[must_use]
    pub fn is_malformed_file(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Snapshot(err) => Some(err.remediation()),
            Self::Storage(err) => Some(err.remediation()),
            Self::Checkpoint(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::OrderingViolation(_) => Some(
                Remediation::new(
                    "Rename snapshot files to YYYY-MM-DD.csv so lexical order equals date order.",
                )
                .command("List inputs", "ls -1 <input_dir> | sort")
                .alternative("Move non-snapshot files out of the input directory."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Check paths", "ls -la <input_dir> <output_dir>")
                    .alternative("Verify the output directories exist and are writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON document and retry.")
                    .command("Validate JSON", "python -m json.tool < manifest.json")
                    .alternative("Delete the corrupt checkpoint manifest; it is regenerated."),
            ),
            Self::Csv(_) => Some(
                Remediation::new("Validate the delimited table and retry.")
                    .command("Inspect header", "head -n 1 <table.csv>")
                    .alternative("Regenerate the table from the snapshot directory."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("A worker stopped unexpectedly. Check logs and retry.")
                    .command("Verbose logs", "RUST_LOG=disklife_core=debug <rerun>")
                    .alternative("Run the feature and survival passes separately."),
            ),
        }
    }
}

/// Errors raised while reading one snapshot file.
///
/// Every variant marks the whole file as malformed.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: String, column: &'static str },

    #[error("{path}:{line}: {reason}")]
    MalformedRow {
        path: String,
        line: u64,
        reason: String,
    },

    #[error("{path}:{line}: invalid failure flag '{value}' (expected 0 or 1)")]
    InvalidFailureFlag {
        path: String,
        line: u64,
        value: String,
    },

    #[error("{path}:{line}: column '{column}' holds non-numeric value '{value}'")]
    InvalidNumber {
        path: String,
        line: u64,
        column: String,
        value: String,
    },

    #[error("{path}: read failed: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
}

impl SnapshotError {
    /// 1-based line of the offending record, when known.
    #[must_use]
    pub fn line(&self) -> Option<u64> {
        match self {
            Self::MalformedRow { line, .. }
            | Self::InvalidFailureFlag { line, .. }
            | Self::InvalidNumber { line, .. } => Some(*line),
            Self::Read { source, .. } => source.position().map(|pos| pos.line()),
            Self::MissingColumn { .. } => None,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::MissingColumn { path, column } => Remediation::new(format!(
                "Snapshot {path} lacks the '{column}' column. Re-export it with a full header."
            ))
            .command("Inspect header", format!("head -n 1 \"{path}\""))
            .alternative("Remove the file from the input directory to skip it explicitly."),
            Self::MalformedRow { path, line, .. }
            | Self::InvalidFailureFlag { path, line, .. }
            | Self::InvalidNumber { path, line, .. } => Remediation::new(format!(
                "Snapshot {path} has a malformed record at line {line}. Fix or drop the record."
            ))
            .command("Show record", format!("sed -n '{line}p' \"{path}\""))
            .alternative("Re-download the daily file from its source."),
            Self::Read { path, .. } => {
                Remediation::new(format!("Snapshot {path} could not be read. Check the file."))
                    .command("Check file", format!("ls -l \"{path}\""))
                    .alternative("Verify the file is UTF-8 delimited text and not truncated.")
            }
        }
    }
}

/// Interval store and feature table errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stored record is invalid: {0}")]
    InvalidRecord(String),

    #[error("Feature table {path} is invalid: {reason}")]
    Table { path: String, reason: String },
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Database(_) => Remediation::new(
                "Interval database operation failed. Check permissions and free space.",
            )
            .command("Check database", "sqlite3 <intervals_db> 'PRAGMA integrity_check'")
            .alternative("Ensure the database directory is writable."),
            Self::InvalidRecord(_) => {
                Remediation::new("The interval database holds a record that cannot be decoded.")
                    .command(
                        "Inspect rows",
                        "sqlite3 <intervals_db> 'SELECT * FROM failure_info LIMIT 20'",
                    )
                    .alternative("Delete the database and rerun the survival pass.")
            }
            Self::Table { path, .. } => Remediation::new(format!(
                "Feature table {path} does not match the expected schema."
            ))
            .command("Inspect header", format!("head -n 1 \"{path}\""))
            .alternative("Unset input.seed_features_path to start from an empty store."),
        }
    }
}

/// Checkpoint persistence errors (never fatal to ingestion)
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("background checkpoint writer is gone")]
    WriterGone,
}

impl CheckpointError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Write { path, .. } => Remediation::new(format!(
                "Checkpoint {path} could not be written. Check free space and permissions."
            ))
            .command("Free space", "df -h <checkpoint_dir>")
            .alternative("Set checkpoint.every = 0 to disable checkpoints."),
            Self::Encode { .. } => {
                Remediation::new("Checkpoint encoding failed. Check logs for the offending value.")
                    .command("Verbose logs", "RUST_LOG=disklife_core=debug <rerun>")
                    .alternative("Set checkpoint.every = 0 to disable checkpoints.")
            }
            Self::WriterGone => {
                Remediation::new("The background checkpoint writer stopped. Check logs.")
                    .command("Verbose logs", "RUST_LOG=disklife_core=debug <rerun>")
                    .alternative("Set checkpoint.background = false to write inline.")
            }
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Omit the config file to run with defaults."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .command("Show config", "cat disklife.toml")
                .alternative("Start from the documented defaults and reapply overrides."),
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Show config", "cat disklife.toml")
                    .alternative("percentile must lie in (0, 1]; censoring_increment must be > 0.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_csv_error() -> csv::Error {
        let data = "a,b\n1,2,3\n";
        let mut reader = csv::ReaderBuilder::new().from_reader(data.as_bytes());
        reader
            .records()
            .find_map(std::result::Result::err)
            .expect("ragged record must fail")
    }

    #[test]
    fn remediation_available_for_error_variants() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let errors = vec![
            Error::Snapshot(SnapshotError::MissingColumn {
                path: "2020-01-01.csv".to_string(),
                column: "failure",
            }),
            Error::Snapshot(SnapshotError::MalformedRow {
                path: "2020-01-01.csv".to_string(),
                line: 3,
                reason: "empty serial".to_string(),
            }),
            Error::Snapshot(SnapshotError::InvalidFailureFlag {
                path: "2020-01-01.csv".to_string(),
                line: 4,
                value: "x".to_string(),
            }),
            Error::Snapshot(SnapshotError::InvalidNumber {
                path: "2020-01-01.csv".to_string(),
                line: 5,
                column: "smart_5_raw".to_string(),
                value: "abc".to_string(),
            }),
            Error::Snapshot(SnapshotError::Read {
                path: "2020-01-01.csv".to_string(),
                source: sample_csv_error(),
            }),
            Error::Storage(StorageError::Database("locked".to_string())),
            Error::Storage(StorageError::InvalidRecord("bad date".to_string())),
            Error::Storage(StorageError::Table {
                path: "features.csv".to_string(),
                reason: "no header".to_string(),
            }),
            Error::Checkpoint(CheckpointError::Write {
                path: "cp.csv".to_string(),
                source: std::io::Error::other("disk full"),
            }),
            Error::Checkpoint(CheckpointError::Encode {
                path: "cp.json".to_string(),
                reason: "nan".to_string(),
            }),
            Error::Checkpoint(CheckpointError::WriterGone),
            Error::Config(ConfigError::FileNotFound("disklife.toml".to_string())),
            Error::Config(ConfigError::ReadFailed(
                "disklife.toml".to_string(),
                "io".to_string(),
            )),
            Error::Config(ConfigError::ParseFailed("parse".to_string())),
            Error::Config(ConfigError::ValidationError("invalid".to_string())),
            Error::OrderingViolation("2020-13-01.csv".to_string()),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
            Error::Csv(sample_csv_error()),
            Error::Runtime("join failed".to_string()),
        ];

        for error in errors {
            let remediation = error.remediation().expect("missing remediation");
            assert!(
                !remediation.summary.is_empty(),
                "remediation summary empty for {error:?}"
            );
            assert!(
                !remediation.commands.is_empty(),
                "remediation commands empty for {error:?}"
            );
        }
    }

    #[test]
    fn only_snapshot_errors_are_malformed_file() {
        let malformed = Error::Snapshot(SnapshotError::MissingColumn {
            path: "x.csv".to_string(),
            column: "model",
        });
        assert!(malformed.is_malformed_file());
        assert!(!Error::OrderingViolation("dup".to_string()).is_malformed_file());
        assert!(!Error::Io(std::io::Error::other("io")).is_malformed_file());
    }

    #[test]
    fn snapshot_error_line_numbers() {
        let err = SnapshotError::InvalidNumber {
            path: "d.csv".to_string(),
            line: 17,
            column: "smart_9_raw".to_string(),
            value: "?".to_string(),
        };
        assert_eq!(err.line(), Some(17));
        let missing = SnapshotError::MissingColumn {
            path: "d.csv".to_string(),
            column: "serial_number",
        };
        assert_eq!(missing.line(), None);
    }

    #[test]
    fn render_plain_omits_empty_sections() {
        let r = Remediation::new("Fix it");
        let output = r.render_plain();
        assert!(output.contains("Fix it"));
        assert!(!output.contains("Commands:"));
        assert!(!output.contains("Alternatives:"));
    }

    #[test]
    fn render_plain_includes_commands_and_alternatives() {
        let r = Remediation::new("Fix it")
            .command("Inspect", "head -n 1 x.csv")
            .alternative("Try plan B");
        let output = r.render_plain();
        assert!(output.contains("Inspect: head -n 1 x.csv"));
        assert!(output.contains("Try plan B"));
    }

    #[test]
    fn format_error_includes_remediation() {
        let err = Error::OrderingViolation("duplicate date 2020-01-01".to_string());
        let text = format_error_with_remediation(&err);
        assert!(text.starts_with("Error: Input ordering violation"));
        assert!(text.contains("To fix:"));
    }

    #[test]
    fn from_rusqlite_error_maps_to_storage() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(StorageError::Database(_))));
    }

    #[test]
    fn snapshot_error_display_carries_location() {
        let err = SnapshotError::InvalidFailureFlag {
            path: "2021-03-04.csv".to_string(),
            line: 9,
            value: "yes".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2021-03-04.csv:9"));
        assert!(msg.contains("yes"));
    }
}
