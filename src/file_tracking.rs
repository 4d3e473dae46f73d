//! Filesystem collection
//!
//! [`FileScanner`] walks a directory tree and produces one [`FileRecord`]
//! per entry (files and directories alike): size, the three timestamps and,
//! for regular files, a SHA-256 of the content.
//!
//! ## Behaviour on unreadable entries
//!
//! - an entry that vanished between listing and inspection is dropped
//! - an entry whose metadata or content cannot be read is kept with the
//!   remark `access denied` and whatever fields could be read
//!
//! Hashing runs on a dedicated rayon pool. Reading a file would normally
//! bump its access time, so the original time is put back afterwards.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use winfingerprint::file_tracking::FileScanner;
//! use winfingerprint::types::ProgressInfo;
//! use std::path::PathBuf;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scanner = FileScanner::new(PathBuf::from("C:\\"))
//!     .with_exclude_patterns(vec!["**/$Recycle.Bin/**".to_string()])
//!     .with_parallel_workers(8);
//!
//! let records = scanner.scan(Some(|progress: ProgressInfo| {
//!     println!("{} entries fingerprinted", progress.processed);
//! }))?;
//! println!("Found {} entries", records.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{FingerprintError, Result};
use crate::types::{FileRecord, ProgressInfo, Timestamp};
use crate::utils::{display_path, hash_file_preserving_atime};
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Remark attached to entries that could not be read
pub const ACCESS_DENIED: &str = "access denied";

/// Parallel filesystem fingerprinting
#[derive(Debug, Clone)]
pub struct FileScanner {
    /// Root directory to fingerprint
    root_path: PathBuf,
    /// Glob patterns of entries to leave out
    exclude_patterns: Vec<String>,
    /// Whether to hash file contents
    hash_files: bool,
    /// Whether to follow symbolic links during traversal
    follow_symlinks: bool,
    /// Number of hashing workers
    parallel_workers: usize,
}

impl FileScanner {
    /// Create a scanner with default settings
    ///
    /// Defaults: no exclusions, hashing on, symlinks not followed, one worker
    /// per CPU core.
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            exclude_patterns: Vec::new(),
            hash_files: true,
            follow_symlinks: false,
            parallel_workers: num_cpus::get().max(1),
        }
    }

    /// Set glob patterns of entries to exclude
    ///
    /// Patterns are matched against the path relative to the root; an
    /// excluded directory is not descended into.
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Enable or disable content hashing
    pub fn with_hash_files(mut self, hash_files: bool) -> Self {
        self.hash_files = hash_files;
        self
    }

    /// Set symbolic link following behavior
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Set number of parallel workers (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    fn build_excludes(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }

    /// Enumerate the entries below the root
    fn enumerate(&self, excludes: &GlobSet) -> Vec<PathBuf> {
        let root = self.root_path.as_path();
        let is_excluded = |path: &Path| {
            let relative = path.strip_prefix(root).unwrap_or(path);
            excludes.is_match(relative)
        };

        let mut paths = Vec::new();
        let mut walk_errors = 0usize;
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !is_excluded(entry.path()));
        for entry in walker {
            match entry {
                Ok(entry) => paths.push(entry.into_path()),
                Err(e) => {
                    walk_errors += 1;
                    let vanished = e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound);
                    if vanished {
                        trace!("Entry vanished during walk: {}", e);
                    } else {
                        debug!("Walk error: {}", e);
                    }
                }
            }
        }
        if walk_errors > 0 {
            warn!("{} directories could not be listed below {}", walk_errors, root.display());
        }
        paths
    }

    /// Fingerprint every entry below the root
    ///
    /// Records come back in walk order.
    ///
    /// # Errors
    ///
    /// - [`FingerprintError::InvalidConfiguration`] if the root is not a directory
    /// - [`FingerprintError::InvalidPattern`] if an exclude pattern does not compile
    /// - [`FingerprintError::ThreadPool`] if the worker pool cannot be created
    pub fn scan<F>(&self, progress_callback: Option<F>) -> Result<Vec<FileRecord>>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        if !self.root_path.is_dir() {
            return Err(FingerprintError::invalid_configuration(format!(
                "{} is not a directory",
                self.root_path.display()
            )));
        }
        let start = Instant::now();
        let excludes = self.build_excludes()?;
        let paths = self.enumerate(&excludes);
        let total = paths.len();
        info!("Fingerprinting {} entries below {}", total, self.root_path.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .build()
            .map_err(|e| FingerprintError::ThreadPool(e.to_string()))?;

        let processed = AtomicUsize::new(0);
        let denied = Mutex::new(Vec::new());
        let records: Vec<FileRecord> = pool.install(|| {
            paths
                .par_iter()
                .filter_map(|path| {
                    let record = self.fingerprint_entry(path);
                    if let Some(record) = &record {
                        if record.remark == ACCESS_DENIED {
                            denied.lock().push(record.path.clone());
                        }
                    }
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(ProgressInfo {
                            operation: "Fingerprinting files".to_string(),
                            current_item: Some(path.to_string_lossy().into_owned()),
                            processed: done,
                            total: Some(total),
                        });
                    }
                    record
                })
                .collect()
        });

        let denied = denied.into_inner();
        if !denied.is_empty() {
            warn!("{} entries could not be read and are marked '{}'", denied.len(), ACCESS_DENIED);
        }
        info!(
            "Fingerprinted {} entries ({} dropped) in {}",
            records.len(),
            total - records.len(),
            humantime::format_duration(std::time::Duration::from_millis(start.elapsed().as_millis() as u64))
        );
        Ok(records)
    }

    /// Build the record of one entry; `None` if it no longer exists
    fn fingerprint_entry(&self, path: &Path) -> Option<FileRecord> {
        let mut record = FileRecord::new(display_path(path));
        let metadata = if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        };
        let metadata = match metadata {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("Entry vanished: {}", path.display());
                return None;
            }
            Err(e) => {
                debug!(
                    "{}",
                    FingerprintError::RecordUnreadable {
                        path: record.path.clone(),
                        reason: e.to_string(),
                    }
                );
                record.remark = ACCESS_DENIED.to_string();
                return Some(record);
            }
        };

        record.size = Some(metadata.len());
        record.created = metadata.created().ok().map(Timestamp::from_system_time);
        record.modified = metadata.modified().ok().map(Timestamp::from_system_time);
        record.accessed = metadata.accessed().ok().map(Timestamp::from_system_time);

        if self.hash_files && metadata.is_file() {
            match hash_file_preserving_atime(path) {
                Ok(hash) => record.hash = hash,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("Entry vanished before hashing: {}", path.display());
                    return None;
                }
                Err(e) => {
                    debug!(
                        "{}",
                        FingerprintError::RecordUnreadable {
                            path: record.path.clone(),
                            reason: e.to_string(),
                        }
                    );
                    record.remark = ACCESS_DENIED.to_string();
                }
            }
        }
        Some(record)
    }
}
