//! # fingerprint - snapshot, diff and filter from the command line
//!
//! ## Usage
//! ```bash
//! # Fingerprint a directory tree
//! fingerprint files C:\ -o c:\fingerprint\before_files.csv
//!
//! # Save the registry hives (needs an elevated prompt)
//! fingerprint export-hives -o c:\fingerprint\before_registry.csv
//!
//! # Compare two snapshots
//! fingerprint diff-files before_files.csv after_files.csv
//! fingerprint diff-registry before_registry.csv after_registry.csv --check-modified
//!
//! # Reduce a Process Monitor trace and two snapshots to each other
//! fingerprint filter procmon.csv diff_files.csv diff_registry.csv -t results
//! ```

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use winfingerprint::registry::{standard_hives, user_hives, RegQuery, RegSaveExporter};
use winfingerprint::utils::sanitize_file_component;
use winfingerprint::{
    diff_output_path, DiffStats, Fingerprint, FingerprintBuilder, FingerprintConfig, ProgressInfo, SnapshotKind,
};

/// Windows file and registry fingerprints
#[derive(Parser)]
#[command(name = "fingerprint")]
#[command(version)]
#[command(about = "Snapshot files and registry, diff snapshots, filter them through a Process Monitor trace")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a directory tree
    Files {
        /// Directory to fingerprint
        root: PathBuf,

        /// Output snapshot (defaults to <host>_<time>_files.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Glob patterns to exclude, relative to the root
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Do not hash file contents
        #[arg(long)]
        no_hash: bool,

        /// Number of hashing workers
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Save the registry hives next to the output snapshot
    ExportHives {
        /// Registry snapshot the copies belong to (defaults to <host>_<time>_registry.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave out the per-user hives under HKU
        #[arg(long)]
        no_users: bool,

        /// Extra arguments for reg save, e.g. /reg:64
        #[arg(long, allow_hyphen_values = true)]
        reg_arg: Vec<String>,
    },

    /// Compare two file snapshots
    DiffFiles {
        /// Earlier snapshot
        before: PathBuf,

        /// Later snapshot
        after: PathBuf,

        /// Diff output (defaults to diff_<before>_<after>_files.csv next to <before>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare two registry snapshots
    DiffRegistry {
        /// Earlier snapshot
        before: PathBuf,

        /// Later snapshot
        after: PathBuf,

        /// Diff output (defaults to diff_<before>_<after>_registry.csv next to <before>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report keys whose only change is their last write time
        #[arg(long)]
        check_modified: bool,
    },

    /// Filter a Process Monitor trace and two snapshots through each other
    Filter {
        /// Process Monitor CSV export
        procmon: PathBuf,

        /// File snapshot or file diff
        files: PathBuf,

        /// Registry snapshot or registry diff
        registry: PathBuf,

        /// Output directory (defaults to the directory of the trace)
        #[arg(short, long)]
        target_dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Install the subscriber: stderr always, the log file when requested
fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("cannot create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Files {
            root,
            output,
            exclude,
            no_hash,
            jobs,
            progress,
        } => {
            let mut builder = FingerprintBuilder::from_config(config);
            if !exclude.is_empty() {
                builder = builder.exclude_patterns(exclude);
            }
            if no_hash {
                builder = builder.hash_files(false);
            }
            if let Some(jobs) = jobs {
                builder = builder.parallel_workers(jobs);
            }
            let output = output.unwrap_or_else(|| default_snapshot_path(SnapshotKind::Files));
            cmd_files(builder.build()?, &root, &output, progress)
        }
        Commands::ExportHives {
            output,
            no_users,
            reg_arg,
        } => {
            let mut builder = FingerprintBuilder::from_config(config);
            if !reg_arg.is_empty() {
                builder = builder.reg_save_args(reg_arg);
            }
            let output = output.unwrap_or_else(|| default_snapshot_path(SnapshotKind::Registry));
            cmd_export_hives(builder.build()?, &output, no_users)
        }
        Commands::DiffFiles { before, after, output } => {
            let output = output.unwrap_or_else(|| default_diff_path(&before, &after, SnapshotKind::Files));
            let fingerprint = Fingerprint::new(config)?;
            cmd_diff(&before, &after, &output, SnapshotKind::Files, |b, a, o| {
                fingerprint.diff_files(b, a, o)
            })
        }
        Commands::DiffRegistry {
            before,
            after,
            output,
            check_modified,
        } => {
            let mut builder = FingerprintBuilder::from_config(config);
            if check_modified {
                builder = builder.check_modified(true);
            }
            let fingerprint = builder.build()?;
            let output = output.unwrap_or_else(|| default_diff_path(&before, &after, SnapshotKind::Registry));
            cmd_diff(&before, &after, &output, SnapshotKind::Registry, |b, a, o| {
                fingerprint.diff_registry(b, a, o)
            })
        }
        Commands::Filter {
            procmon,
            files,
            registry,
            target_dir,
        } => {
            let target_dir = target_dir.unwrap_or_else(|| parent_dir(&procmon));
            cmd_filter(Fingerprint::new(config)?, &procmon, &files, &registry, &target_dir)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FingerprintConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("cannot read config {}", path.display()))?;
            let config = serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FingerprintConfig::default()),
    }
}

/// `<host>_<local time>_<kind>.csv` in the working directory
fn default_snapshot_path(kind: SnapshotKind) -> PathBuf {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    PathBuf::from(format!("{}_{}_{}.csv", sanitize_file_component(&host), stamp, kind))
}

fn default_diff_path(before: &Path, after: &Path, kind: SnapshotKind) -> PathBuf {
    diff_output_path(&parent_dir(before), before, after, kind)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn elapsed(start: Instant) -> String {
    format_duration(Duration::from_millis(start.elapsed().as_millis() as u64)).to_string()
}

/// Fingerprint a directory tree
fn cmd_files(fingerprint: Fingerprint, root: &Path, output: &Path, show_progress: bool) -> anyhow::Result<()> {
    println!("{} {}", "Fingerprinting".blue().bold(), root.display().to_string().cyan());
    let start = Instant::now();

    let summary = if show_progress {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        let bar = pb.clone();
        let summary = fingerprint.fingerprint_files(
            root,
            output,
            Some(move |info: ProgressInfo| {
                if let Some(total) = info.total {
                    bar.set_length(total as u64);
                }
                bar.set_position(info.processed as u64);
            }),
        );
        pb.finish_and_clear();
        summary?
    } else {
        fingerprint.fingerprint_files(root, output, None::<fn(ProgressInfo)>)?
    };

    println!("{} Wrote {}", "✓".green().bold(), output.display().to_string().cyan());
    println!("  Records: {}", summary.records.to_string().cyan());
    if summary.unreadable > 0 {
        println!("  Unreadable: {}", summary.unreadable.to_string().yellow());
    }
    println!("  Time: {}", elapsed(start).cyan());
    Ok(())
}

/// Save the registry hives
fn cmd_export_hives(fingerprint: Fingerprint, output: &Path, no_users: bool) -> anyhow::Result<()> {
    println!("{}", "Saving registry hives...".blue().bold());
    let start = Instant::now();

    let mut hives = standard_hives(output);
    if !no_users {
        let query = RegQuery;
        hives.extend(user_hives(output, &query.user_sids(), &query));
    }
    let exporter = RegSaveExporter::new(fingerprint.config().reg_save_args.clone());
    let (exported, skipped) = fingerprint.export_hives(&exporter, &hives);

    for hive in &exported {
        println!(
            "  {} {} -> {}",
            "✓".green(),
            hive.hive_root_name,
            hive.backing_file_path.display().to_string().cyan()
        );
    }
    for hive in &skipped {
        println!("  {} {}", "✗".red(), hive.yellow());
    }
    if exported.is_empty() && !hives.is_empty() {
        println!("{}", "No hive could be saved; run from an elevated prompt".yellow());
    }
    println!("  Time: {}", elapsed(start).cyan());
    Ok(())
}

/// Compare two snapshots of the same kind
fn cmd_diff<F>(before: &Path, after: &Path, output: &Path, kind: SnapshotKind, run: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path, &Path, &Path) -> winfingerprint::Result<DiffStats>,
{
    println!(
        "{} {} {} {}",
        format!("Comparing {} snapshots", kind).blue().bold(),
        before.display().to_string().cyan(),
        "->".dimmed(),
        after.display().to_string().cyan()
    );
    let start = Instant::now();
    let stats = run(before, after, output)?;

    println!("{} Wrote {}", "✓".green().bold(), output.display().to_string().cyan());
    show_diff_stats(&stats);
    println!("  Time: {}", elapsed(start).cyan());
    Ok(())
}

fn show_diff_stats(stats: &DiffStats) {
    println!("{}", "Summary:".bold());
    if !stats.has_changes() {
        println!("  {}", "No changes".dimmed());
        return;
    }
    println!("  Added: {}", stats.added.to_string().green());
    println!("  Deleted: {}", stats.deleted.to_string().red());
    println!("  Changed: {}", stats.changed.to_string().yellow());
    println!("  Changed silently: {}", stats.changed_silent.to_string().yellow());
}

/// Filter a trace and two snapshots
fn cmd_filter(
    fingerprint: Fingerprint,
    procmon: &Path,
    files: &Path,
    registry: &Path,
    target_dir: &Path,
) -> anyhow::Result<()> {
    println!("{} {}", "Filtering".blue().bold(), procmon.display().to_string().cyan());
    let start = Instant::now();
    let summary = fingerprint.filter_procmon(procmon, files, registry, target_dir)?;
    let report = &summary.report;

    println!(
        "  Events: {}/{} -> {}",
        report.events_kept.to_string().green(),
        report.events_total,
        summary.outputs.procmon.display().to_string().cyan()
    );
    println!(
        "  Files: {}/{} -> {}",
        report.files_kept.to_string().green(),
        report.files_total,
        summary.outputs.files.display().to_string().cyan()
    );
    println!(
        "  Registry: {}/{} -> {}",
        report.registry_kept.to_string().green(),
        report.registry_total,
        summary.outputs.registry.display().to_string().cyan()
    );
    println!("  Time: {}", elapsed(start).cyan());
    Ok(())
}
