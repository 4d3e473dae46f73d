//! Process monitor correlation
//!
//! A Process Monitor CSV export lists every filesystem and registry access a
//! traced process made. Correlating it against a pair of snapshots narrows
//! both sides down to what matters for that process:
//!
//! - the events whose `Path` names something present in a snapshot
//! - the file records and registry rows whose path shows up in the trace
//!
//! Matching is exact string equality. Registry rows are matched under their
//! access path (`path` for a key, `path\value_name` for a value) and under
//! every alias of that path, so an event on `HKCU\Software\Classes\.txt`
//! finds a row captured as `HKCR\.txt`.

use crate::aliasing::access_path_index;
use crate::collections::{HashSet, HashSetExt};
use crate::error::Result;
use crate::snapshot::{create_writer, CsvInput, FileSnapshot, RegistrySnapshot};
use crate::types::{FileRecord, RegistryRow};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the column carrying the accessed path
pub const PATH_COLUMN: &str = "Path";

/// Columns written to a filtered event log
pub const FILTERED_COLUMNS: [&str; 7] = [
    "Time of Day",
    "Process Name",
    "PID",
    "Operation",
    PATH_COLUMN,
    "Result",
    "Detail",
];

/// One access event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcmonEvent {
    columns: Arc<Vec<String>>,
    values: Vec<String>,
}

impl ProcmonEvent {
    /// Build an event from `(column, value)` pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (columns, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(column, value)| (column.to_string(), value.to_string()))
            .unzip();
        Self {
            columns: Arc::new(columns),
            values,
        }
    }

    /// Value of `column`, if the log has it
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|position| self.values.get(position))
            .map(String::as_str)
    }

    /// The accessed path
    pub fn path(&self) -> &str {
        self.get(PATH_COLUMN).unwrap_or_default()
    }
}

/// A loaded process monitor trace
#[derive(Debug, Clone, Default)]
pub struct ProcmonLog {
    events: Vec<ProcmonEvent>,
}

impl ProcmonLog {
    /// Load a Process Monitor CSV export
    ///
    /// Fails with `SnapshotUnreadable` if the file cannot be read or has no
    /// `Path` column.
    pub fn load(path: &Path) -> Result<Self> {
        let mut input = CsvInput::open(path, &[PATH_COLUMN])?;
        let columns = Arc::new(input.columns.names().to_vec());
        let events: Vec<ProcmonEvent> = input
            .rows(path)
            .into_iter()
            .map(|values| ProcmonEvent {
                columns: Arc::clone(&columns),
                values,
            })
            .collect();
        info!("Loaded {} procmon events from {}", events.len(), path.display());
        Ok(Self { events })
    }

    /// Build a log from events already in memory
    pub fn from_events(events: Vec<ProcmonEvent>) -> Self {
        Self { events }
    }

    /// Events in trace order
    pub fn events(&self) -> &[ProcmonEvent] {
        &self.events
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct accessed paths
    pub fn accessed_paths(&self) -> HashSet<&str> {
        let mut paths = HashSet::with_capacity(self.events.len());
        for event in &self.events {
            paths.insert(event.path());
        }
        paths
    }
}

/// Counts describing one correlation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationReport {
    /// Events in the trace
    pub events_total: usize,
    /// Events whose path is known to a snapshot
    pub events_kept: usize,
    /// Distinct paths in the trace
    pub paths_accessed: usize,
    /// File records in the snapshot
    pub files_total: usize,
    /// File records accessed by the trace
    pub files_kept: usize,
    /// Registry rows in the snapshot
    pub registry_total: usize,
    /// Registry rows accessed by the trace
    pub registry_kept: usize,
}

/// The filtered views produced by [`correlate`]
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    /// Events touching a snapshot record, in trace order
    pub events: Vec<ProcmonEvent>,
    /// File records the trace touched, in snapshot order
    pub files: Vec<FileRecord>,
    /// Registry rows the trace touched, in snapshot order
    pub registry: Vec<RegistryRow>,
    /// Counts
    pub report: CorrelationReport,
}

/// Cross-reference a trace with a file and a registry snapshot
pub fn correlate(log: &ProcmonLog, files: &FileSnapshot, registry: &RegistrySnapshot) -> Correlation {
    let registry_index = access_path_index(registry);
    debug!(
        "Registry access index: {} paths, {} aliases",
        registry_index.canonical_len(),
        registry_index.alias_len()
    );

    let mut file_hits = BTreeSet::new();
    let mut registry_hits = BTreeSet::new();
    let mut events = Vec::new();
    let accessed = log.accessed_paths();

    for event in log.events() {
        let path = event.path().to_string();
        let file_hit = files.position(&path);
        let registry_hit = registry_index.lookup(&path);
        if file_hit.is_some() || registry_hit.is_some() {
            events.push(event.clone());
        }
        file_hits.extend(file_hit);
        registry_hits.extend(registry_hit);
    }

    let files_kept: Vec<FileRecord> = file_hits
        .iter()
        .filter_map(|&position| files.record(position).cloned())
        .collect();
    let registry_kept: Vec<RegistryRow> = registry_hits
        .iter()
        .filter_map(|&position| registry.record(position).cloned())
        .collect();

    let report = CorrelationReport {
        events_total: log.len(),
        events_kept: events.len(),
        paths_accessed: accessed.len(),
        files_total: files.len(),
        files_kept: files_kept.len(),
        registry_total: registry.len(),
        registry_kept: registry_kept.len(),
    };
    info!(
        "Correlation kept {}/{} events, {}/{} file records, {}/{} registry rows",
        report.events_kept,
        report.events_total,
        report.files_kept,
        report.files_total,
        report.registry_kept,
        report.registry_total
    );

    Correlation {
        events,
        files: files_kept,
        registry: registry_kept,
        report,
    }
}

/// Write events with the fixed column subset of a filtered trace
pub fn write_filtered_events(path: &Path, events: &[ProcmonEvent]) -> Result<usize> {
    let mut writer = create_writer(path)?;
    writer.write_record(FILTERED_COLUMNS)?;
    for event in events {
        writer.write_record(FILTERED_COLUMNS.iter().map(|column| event.get(column).unwrap_or_default()))?;
    }
    writer.flush()?;
    debug!("Wrote {} procmon events to {}", events.len(), path.display());
    Ok(events.len())
}
