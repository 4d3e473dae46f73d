//! Error types for the fingerprint library
//!
//! Errors fall into two groups. Fatal errors (an unreadable snapshot, a bad
//! configuration) abort the pipeline that raised them. Recoverable errors
//! (a truncated field, an unreadable record, a hive that could not be
//! exported) are logged with enough context to diagnose and the run goes on.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the fingerprint library
pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Main error type for all fingerprint operations
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors raised by the CSV reader or writer
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required snapshot (or procmon log) could not be opened or has no usable header
    #[error("Snapshot unreadable: {path:?}: {reason}")]
    SnapshotUnreadable {
        /// Path of the snapshot
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A registry value was longer than the configured field length limit
    #[error("Field truncated: key {key}, value name {value_name:?}, length {length} exceeds limit {limit}")]
    FieldTruncated {
        /// Registry key path
        key: String,
        /// Value name (empty for the default value)
        value_name: String,
        /// Rendered length before truncation
        length: usize,
        /// Configured limit
        limit: usize,
    },

    /// A single filesystem entry or registry value could not be read
    #[error("Record unreadable: {path}: {reason}")]
    RecordUnreadable {
        /// Path of the entry
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Exporting one registry hive failed
    #[error("Hive export failed for {hive}: {reason}")]
    HiveExportFailed {
        /// Hive root name, e.g. `HKLM\SAM`
        hive: String,
        /// What went wrong
        reason: String,
    },

    /// Parsing one exported hive failed
    #[error("Hive parse failed for {hive}: {reason}")]
    HiveParseFailed {
        /// Hive root name
        hive: String,
        /// What went wrong
        reason: String,
    },

    /// A record carried a value that cannot be interpreted
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Exclude pattern could not be compiled
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FingerprintError {
    /// Create a snapshot-unreadable error
    pub fn snapshot_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FingerprintError::SnapshotUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a hive-export error
    pub fn hive_export_failed(hive: impl Into<String>, reason: impl Into<String>) -> Self {
        FingerprintError::HiveExportFailed {
            hive: hive.into(),
            reason: reason.into(),
        }
    }

    /// Create a hive-parse error
    pub fn hive_parse_failed(hive: impl Into<String>, reason: impl Into<String>) -> Self {
        FingerprintError::HiveParseFailed {
            hive: hive.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        FingerprintError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        FingerprintError::Internal(msg.into())
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are logged and the affected record or hive is
    /// annotated or skipped; everything else stops the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FingerprintError::FieldTruncated { .. }
                | FingerprintError::RecordUnreadable { .. }
                | FingerprintError::HiveExportFailed { .. }
                | FingerprintError::HiveParseFailed { .. }
        )
    }

    /// Check if this error must abort the calling pipeline
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            FingerprintError::SnapshotUnreadable { path, reason } => {
                format!(
                    "Cannot read snapshot {:?} ({}). Check the path and that the file is a fingerprint CSV with a header row.",
                    path, reason
                )
            }
            FingerprintError::HiveExportFailed { hive, .. } => {
                format!("Cannot export registry hive {}. Exporting hives needs to run as Administrator.", hive)
            }
            FingerprintError::InvalidConfiguration(msg) => {
                format!("Invalid configuration: {}. Check the config file and command line flags.", msg)
            }
            _ => self.to_string(),
        }
    }
}
