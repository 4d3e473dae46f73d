//! Pipelines
//!
//! [`Fingerprint`] ties the components together into the operations a user
//! runs: collect a snapshot, diff two snapshots, filter snapshots through a
//! process monitor trace. Every pipeline takes its settings from the
//! [`FingerprintConfig`] the instance was built with; nothing is global.
//!
//! ## Output naming
//!
//! | Pipeline | File |
//! |---|---|
//! | file diff | `diff_<before>_<after>_files.csv` |
//! | registry diff | `diff_<before>_<after>_registry.csv` |
//! | filtered trace | `<procmon>_filtered_by_fingerprints_REG_<registry>_FILE_<files>.csv` |
//! | filtered files | `<files>_accessed_by_PROCMON_<procmon>.csv` |
//! | filtered registry | `<registry>_accessed_by_PROCMON_<procmon>.csv` |
//!
//! where each `<name>` is the input file name without its extension.

use crate::diff::{diff, FieldComparisonPolicy};
use crate::error::{FingerprintError, Result};
use crate::file_tracking::{FileScanner, ACCESS_DENIED};
use crate::procmon::{correlate, write_filtered_events, CorrelationReport, ProcmonLog};
use crate::registry::{
    write_registry_entries, HiveExporter, HiveParser, RegistryCollector, TruncationReport,
};
use crate::snapshot::{
    load_file_snapshot, load_registry_snapshot, write_file_snapshot, write_registry_snapshot,
};
use crate::types::{DiffStats, FingerprintConfig, ProgressInfo, RegistryHiveDescriptor};
use crate::utils::snapshot_name;
use globset::Glob;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The two kinds of snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Filesystem snapshot
    Files,
    /// Registry snapshot
    Registry,
}

impl SnapshotKind {
    /// Suffix used in output names
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Files => "files",
            SnapshotKind::Registry => "registry",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path of the diff between `before` and `after`
///
/// ```rust
/// use winfingerprint::fingerprint::{diff_output_path, SnapshotKind};
/// use std::path::Path;
///
/// let path = diff_output_path(
///     Path::new("out"),
///     Path::new("out/test.csv"),
///     Path::new("out/test2.csv"),
///     SnapshotKind::Registry,
/// );
/// assert_eq!(path, Path::new("out").join("diff_test_test2_registry.csv"));
/// ```
pub fn diff_output_path(dir: &Path, before: &Path, after: &Path, kind: SnapshotKind) -> PathBuf {
    dir.join(format!(
        "diff_{}_{}_{}.csv",
        snapshot_name(before),
        snapshot_name(after),
        kind
    ))
}

/// Files written by the filter pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutputs {
    /// Filtered trace
    pub procmon: PathBuf,
    /// File records accessed by the trace
    pub files: PathBuf,
    /// Registry rows accessed by the trace
    pub registry: PathBuf,
}

impl FilterOutputs {
    /// Output paths for a trace and a pair of snapshots
    pub fn new(target_dir: &Path, procmon: &Path, files: &Path, registry: &Path) -> Self {
        let procmon_name = snapshot_name(procmon);
        let files_name = snapshot_name(files);
        let registry_name = snapshot_name(registry);
        Self {
            procmon: target_dir.join(format!(
                "{}_filtered_by_fingerprints_REG_{}_FILE_{}.csv",
                procmon_name, registry_name, files_name
            )),
            files: target_dir.join(format!("{}_accessed_by_PROCMON_{}.csv", files_name, procmon_name)),
            registry: target_dir.join(format!("{}_accessed_by_PROCMON_{}.csv", registry_name, procmon_name)),
        }
    }
}

/// Result of the filter pipeline
#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    /// Where the filtered views went
    pub outputs: FilterOutputs,
    /// What was kept
    pub report: CorrelationReport,
}

/// Result of a file collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileCollectionSummary {
    /// Records written
    pub records: usize,
    /// Records marked unreadable
    pub unreadable: usize,
}

/// Result of a registry collection
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryCollectionSummary {
    /// Hives exported and parsed
    pub parsed: Vec<String>,
    /// Hives left out
    pub skipped: Vec<String>,
    /// Write statistics
    pub written: TruncationReport,
}

/// Entry point for every pipeline
///
/// # Examples
///
/// ```rust,no_run
/// use winfingerprint::Fingerprint;
/// use std::path::Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fingerprint = Fingerprint::builder().check_modified(false).build()?;
/// let stats = fingerprint.diff_registry(
///     Path::new("c:/fingerprint/before_registry.csv"),
///     Path::new("c:/fingerprint/after_registry.csv"),
///     Path::new("c:/fingerprint/diff_before_after_registry.csv"),
/// )?;
/// println!("{} registry changes", stats.total());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Fingerprint {
    config: FingerprintConfig,
}

impl Fingerprint {
    /// Create an instance after validating `config`
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        validate(&config)?;
        Ok(Self { config })
    }

    /// Start a builder with default settings
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder::new()
    }

    /// The configuration in use
    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Fingerprint every entry below `root` into the file snapshot `output`
    pub fn fingerprint_files<F>(&self, root: &Path, output: &Path, progress: Option<F>) -> Result<FileCollectionSummary>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        info!("Creating file fingerprint of {}", root.display());
        let records = FileScanner::new(root.to_path_buf())
            .with_exclude_patterns(self.config.exclude_patterns.clone())
            .with_hash_files(self.config.hash_files)
            .with_follow_symlinks(self.config.follow_symlinks)
            .with_parallel_workers(self.config.parallel_workers)
            .scan(progress)?;
        let written = write_file_snapshot(output, &records)?;
        let unreadable = records.iter().filter(|r| r.remark == ACCESS_DENIED).count();
        info!("File fingerprint written to {}", output.display());
        Ok(FileCollectionSummary {
            records: written,
            unreadable,
        })
    }

    /// Export and parse `hives` into the registry snapshot `output`
    ///
    /// A hive that cannot be exported or parsed is logged and left out.
    pub fn fingerprint_registry(
        &self,
        exporter: &dyn HiveExporter,
        parser: &dyn HiveParser,
        hives: &[RegistryHiveDescriptor],
        output: &Path,
    ) -> Result<RegistryCollectionSummary> {
        info!("Creating registry fingerprint of {} hives", hives.len());
        let collection = RegistryCollector::new(exporter, parser)
            .with_retain_hive_copies(self.config.retain_hive_copies)
            .collect(hives);
        if collection.parsed.is_empty() && !hives.is_empty() {
            warn!("No registry hive could be collected; exporting hives needs Administrator rights");
        }
        let written = write_registry_entries(output, &collection.entries, self.config.field_length_limit)?;
        Ok(RegistryCollectionSummary {
            parsed: collection.parsed,
            skipped: collection.skipped,
            written,
        })
    }

    /// Export `hives` and keep the copies; returns the ones exported
    pub fn export_hives(
        &self,
        exporter: &dyn HiveExporter,
        hives: &[RegistryHiveDescriptor],
    ) -> (Vec<RegistryHiveDescriptor>, Vec<String>) {
        struct NoParser;
        impl HiveParser for NoParser {
            fn parse(&self, hive: &RegistryHiveDescriptor) -> Result<crate::registry::HiveNode> {
                Err(FingerprintError::hive_parse_failed(&hive.hive_root_name, "no parser"))
            }
        }
        let mut skipped = Vec::new();
        let exported = RegistryCollector::new(exporter, &NoParser)
            .export(hives, &mut skipped)
            .keep();
        (exported, skipped)
    }

    /// Diff two file snapshots into `output`
    pub fn diff_files(&self, before: &Path, after: &Path, output: &Path) -> Result<DiffStats> {
        info!("Creating file diff between {} and {}", before.display(), after.display());
        let before = load_file_snapshot(before)?;
        let after = load_file_snapshot(after)?;
        let outcome = diff(&before, &after, &self.config.file_policy);
        write_file_snapshot(output, &outcome.records)?;
        info!("File diff written to {}", output.display());
        Ok(outcome.stats)
    }

    /// Diff two registry snapshots into `output`
    pub fn diff_registry(&self, before: &Path, after: &Path, output: &Path) -> Result<DiffStats> {
        info!("Creating registry diff between {} and {}", before.display(), after.display());
        let before = load_registry_snapshot(before)?;
        let after = load_registry_snapshot(after)?;
        let outcome = diff(&before, &after, &self.config.registry_policy());
        write_registry_snapshot(output, &outcome.records)?;
        info!("Registry diff written to {}", output.display());
        Ok(outcome.stats)
    }

    /// Filter a trace and two snapshots down to what the trace touched
    ///
    /// The three filtered views are written into `target_dir` under the names
    /// of [`FilterOutputs::new`].
    pub fn filter_procmon(
        &self,
        procmon: &Path,
        files: &Path,
        registry: &Path,
        target_dir: &Path,
    ) -> Result<FilterSummary> {
        let log = ProcmonLog::load(procmon)?;
        let file_table = load_file_snapshot(files)?;
        let registry_table = load_registry_snapshot(registry)?;

        let correlation = correlate(&log, &file_table, &registry_table);
        let outputs = FilterOutputs::new(target_dir, procmon, files, registry);
        write_filtered_events(&outputs.procmon, &correlation.events)?;
        write_file_snapshot(&outputs.files, &correlation.files)?;
        write_registry_snapshot(&outputs.registry, &correlation.registry)?;
        info!("Filtered views written to {}", target_dir.display());

        Ok(FilterSummary {
            outputs,
            report: correlation.report,
        })
    }
}

fn validate(config: &FingerprintConfig) -> Result<()> {
    if config.parallel_workers == 0 {
        return Err(FingerprintError::invalid_configuration("parallel_workers must be at least 1"));
    }
    for pattern in &config.exclude_patterns {
        Glob::new(pattern)?;
    }
    Ok(())
}

/// Builder for [`Fingerprint`]
///
/// # Examples
///
/// ```rust
/// use winfingerprint::FingerprintBuilder;
///
/// let fingerprint = FingerprintBuilder::new()
///     .field_length_limit(1024)
///     .check_modified(true)
///     .exclude_patterns(vec!["**/*.tmp".to_string()])
///     .build()
///     .unwrap();
/// assert_eq!(fingerprint.config().field_length_limit, 1024);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FingerprintBuilder {
    config: FingerprintConfig,
}

impl FingerprintBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded from a file
    pub fn from_config(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Truncate registry values longer than `limit` characters (0 = unlimited)
    pub fn field_length_limit(mut self, limit: usize) -> Self {
        self.config.field_length_limit = limit;
        self
    }

    /// Report registry keys whose only change is their last write time
    pub fn check_modified(mut self, check: bool) -> Self {
        self.config.check_modified = check;
        self
    }

    /// Hash file contents during collection
    pub fn hash_files(mut self, hash: bool) -> Self {
        self.config.hash_files = hash;
        self
    }

    /// Keep exported hive files
    pub fn retain_hive_copies(mut self, retain: bool) -> Self {
        self.config.retain_hive_copies = retain;
        self
    }

    /// Number of hashing workers
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.config.parallel_workers = workers;
        self
    }

    /// Follow symbolic links during collection
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.config.follow_symlinks = follow;
        self
    }

    /// Glob patterns excluded from file collection
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Extra arguments for `reg save`
    pub fn reg_save_args(mut self, args: Vec<String>) -> Self {
        self.config.reg_save_args = args;
        self
    }

    /// Field roles for the file diff
    pub fn file_policy(mut self, policy: FieldComparisonPolicy) -> Self {
        self.config.file_policy = policy;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// - [`FingerprintError::InvalidConfiguration`] if `parallel_workers` is 0
    /// - [`FingerprintError::InvalidPattern`] if an exclude pattern does not compile
    pub fn build(self) -> Result<Fingerprint> {
        Fingerprint::new(self.config)
    }
}
