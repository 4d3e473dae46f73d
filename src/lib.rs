//! # winfingerprint - Windows file and registry fingerprints
//!
//! Capture the state of a directory tree and of the Windows registry as
//! CSV snapshots, compare two snapshots, and narrow the result down to what
//! a single process touched according to a Process Monitor trace.
//!
//! ## Overview
//!
//! A typical investigation of what an installer does:
//!
//! 1. Fingerprint the files and the registry before installing
//! 2. Install while Process Monitor records the installer
//! 3. Fingerprint again
//! 4. Diff the two file snapshots and the two registry snapshots
//! 5. Filter the trace and the snapshots through each other
//!
//! Every step reads and writes plain CSV, so a snapshot can be opened in a
//! spreadsheet, edited by hand, or produced by another tool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use winfingerprint::Fingerprint;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fingerprint = Fingerprint::builder()
//!     .exclude_patterns(vec!["Windows/Temp/**".to_string()])
//!     .build()?;
//!
//! fingerprint.fingerprint_files(
//!     Path::new("C:\\"),
//!     Path::new("out/before_files.csv"),
//!     None::<fn(winfingerprint::ProgressInfo)>,
//! )?;
//!
//! // ... install something, fingerprint again into out/after_files.csv ...
//!
//! let stats = fingerprint.diff_files(
//!     Path::new("out/before_files.csv"),
//!     Path::new("out/after_files.csv"),
//!     Path::new("out/diff_before_files_after_files_files.csv"),
//! )?;
//! println!("{} added, {} deleted, {} changed", stats.added, stats.deleted, stats.changed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Snapshots
//!
//! A file snapshot has one row per file or directory
//! (`path, size, created, modified, accessed, hash, change, remark`). A
//! registry snapshot has one `KEY` row per key followed by one row per value
//! (`path, modified, value_name, value_type, value, change, value_old`).
//! Records are identified by `path`, or by `(path, value_name)` for the
//! registry.
//!
//! ### Change classification
//!
//! Each compared field has a role: a difference in a *loud* field makes a
//! record `CHANGED`, a difference only in *silent* fields makes it
//! `CHANGED_SILENT`, and *ignored* fields are not compared. Records missing
//! from one side are `ADDED` or `DELETED`. See [`diff`].
//!
//! ### Registry aliases
//!
//! Windows shows the same registry data under several roots: `HKCR` merges
//! `HKLM\Software\Classes` and `HKCU\Software\Classes`, and `HKU\<sid>` is
//! `HKCU` for the logged-on user. Loading a registry snapshot registers each
//! row under these extra names as well, so a key captured as `HKCR\.txt`
//! matches a trace event on `HKCU\Software\Classes\.txt`. See [`aliasing`].
//!
//! ## Error Handling
//!
//! Operations return [`Result<T>`](Result) with a [`FingerprintError`]. A
//! snapshot that cannot be read aborts the operation; problems with a single
//! record or hive are logged through `tracing` and the run continues.
//!
//! ## Module Organization
//!
//! - [`fingerprint`]: pipelines and the builder
//! - [`snapshot`]: CSV loading and writing
//! - [`diff`]: the diff engine and comparison policies
//! - [`aliasing`]: registry path aliases
//! - [`procmon`]: trace correlation
//! - [`file_tracking`], [`registry`]: collection
//! - [`types`], [`table`]: records and the lookup table holding them
//! - [`error`]: error types

// Public API modules
pub mod aliasing;
pub mod diff;
pub mod error;
pub mod file_tracking;
pub mod fingerprint;
pub mod procmon;
pub mod registry;
pub mod snapshot;
pub mod table;
pub mod types;
pub mod utils;

// Internal modules
mod collections;

// Re-export main types for convenience
pub use diff::{diff, DiffOutcome, Diffable, FieldChange, FieldComparisonPolicy, FieldRole, RecordField};
pub use error::{FingerprintError, Result};
pub use fingerprint::{
    diff_output_path, FileCollectionSummary, FilterOutputs, FilterSummary, Fingerprint, FingerprintBuilder,
    RegistryCollectionSummary, SnapshotKind,
};
pub use procmon::{correlate, Correlation, CorrelationReport, ProcmonEvent, ProcmonLog};
pub use snapshot::{FileSnapshot, RegistrySnapshot};
pub use table::RecordTable;
pub use types::*;
