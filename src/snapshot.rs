//! Snapshot reading and writing
//!
//! Snapshots are CSV files with a header row. Reading validates and types
//! every row at this boundary: a row with a malformed field is kept, with the
//! typed field left empty, the cell text kept verbatim and a warning logged,
//! so that one bad cell never costs a whole record. Only an unopenable file or a missing header (or a
//! missing identity column) is fatal.
//!
//! ## Schemas
//!
//! - files: `path,size,created,modified,accessed,hash,change,remark`
//!   (legacy snapshots carry `status` instead of `remark` and may lack `hash`)
//! - registry: `path,modified,value_name,value_type,value,change,value_old`
//!
//! A leading UTF-8 byte-order mark is tolerated.

use crate::aliasing::apply_registry_aliases;
use crate::collections::{HashMap, HashMapExt};
use crate::error::{FingerprintError, Result};
use crate::table::RecordTable;
use crate::types::{
    ChangeKind, FileRecord, RegistryKey, RegistryRow, RegistryValueType, Timestamp, UnparsedCells,
};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info, warn};

/// Header of a file snapshot
pub const FILE_HEADER: [&str; 8] = [
    "path", "size", "created", "modified", "accessed", "hash", "change", "remark",
];

/// Header of a registry snapshot
pub const REGISTRY_HEADER: [&str; 7] = [
    "path",
    "modified",
    "value_name",
    "value_type",
    "value",
    "change",
    "value_old",
];

/// Lookup table over a file snapshot, keyed by path
pub type FileSnapshot = RecordTable<String, FileRecord>;

/// Lookup table over a registry snapshot, keyed by (path, value name) plus aliases
pub type RegistrySnapshot = RecordTable<RegistryKey, RegistryRow>;

const BOM: char = '\u{feff}';

/// Column positions of a CSV header
#[derive(Debug, Clone)]
pub(crate) struct Columns {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Columns {
    fn from_header(header: &csv::ByteRecord) -> Self {
        let mut names = Vec::with_capacity(header.len());
        let mut positions = HashMap::with_capacity(header.len());
        for (position, raw) in header.iter().enumerate() {
            let name = String::from_utf8_lossy(raw);
            let name = name.trim_start_matches(BOM).trim().to_string();
            positions.entry(name.clone()).or_insert(position);
            names.push(name);
        }
        Self { names, positions }
    }

    /// Column names in header order
    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Field `name` of `row`; missing columns and short rows read as empty
    pub(crate) fn field(&self, row: &[String], name: &str) -> String {
        self.position(name)
            .and_then(|position| row.get(position))
            .cloned()
            .unwrap_or_default()
    }
}

/// An open CSV input with its header checked
pub(crate) struct CsvInput {
    pub(crate) columns: Columns,
    reader: csv::Reader<File>,
}

impl CsvInput {
    /// Open `path` and require every column in `required`
    pub(crate) fn open(path: &Path, required: &[&str]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| FingerprintError::snapshot_unreadable(path, e.to_string()))?;

        let header = reader
            .byte_headers()
            .map_err(|e| FingerprintError::snapshot_unreadable(path, e.to_string()))?
            .clone();
        let columns = Columns::from_header(&header);
        if columns.names().iter().all(|name| name.is_empty()) {
            return Err(FingerprintError::snapshot_unreadable(path, "missing header"));
        }
        if let Some(missing) = required.iter().find(|name| !columns.contains(name)) {
            return Err(FingerprintError::snapshot_unreadable(
                path,
                format!("header has no '{}' column", missing),
            ));
        }
        Ok(Self { columns, reader })
    }

    /// Remaining rows as lossily decoded strings
    ///
    /// Rows the CSV parser rejects are logged and skipped.
    pub(crate) fn rows(&mut self, path: &Path) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for (number, row) in self.reader.byte_records().enumerate() {
            match row {
                Ok(row) => rows.push(
                    row.iter()
                        .map(|field| String::from_utf8_lossy(field).into_owned())
                        .collect(),
                ),
                Err(e) => warn!("Skipping unreadable row {} of {}: {}", number + 2, path.display(), e),
            }
        }
        rows
    }
}

/// A typed cell, or the verbatim text when it does not parse
type Cell<T> = (Option<T>, Option<String>);

fn optional_timestamp(raw: String, column: &str, path: &str) -> Cell<Timestamp> {
    if raw.trim().is_empty() {
        return (None, None);
    }
    match Timestamp::parse(&raw) {
        Ok(ts) => (Some(ts), None),
        Err(e) => {
            warn!("Keeping {} of {} as text: {}", column, path, e);
            (None, Some(raw))
        }
    }
}

fn optional_size(raw: String, path: &str) -> Cell<u64> {
    match raw.trim() {
        "" => (None, None),
        text => match text.parse::<u64>() {
            Ok(size) => (Some(size), None),
            Err(_) => {
                warn!("Keeping size of {} as text: {:?} is not a byte count", path, text);
                (None, Some(raw))
            }
        },
    }
}

fn change_kind(raw: &str, path: &str) -> ChangeKind {
    raw.parse().unwrap_or_else(|e| {
        warn!("Ignoring change column of {}: {}", path, e);
        ChangeKind::Unset
    })
}

/// Load a file snapshot
///
/// Duplicate paths keep their first row.
pub fn load_file_snapshot(path: &Path) -> Result<FileSnapshot> {
    let mut input = CsvInput::open(path, &["path"])?;
    let remark_column = if input.columns.contains("remark") { "remark" } else { "status" };
    let rows = input.rows(path);

    let mut table = FileSnapshot::new();
    let mut duplicates = 0usize;
    for row in &rows {
        let record_path = input.columns.field(row, "path");
        if record_path.is_empty() {
            warn!("Skipping file row without a path in {}", path.display());
            continue;
        }

        let (size, size_text) = optional_size(input.columns.field(row, "size"), &record_path);
        let (created, created_text) =
            optional_timestamp(input.columns.field(row, "created"), "created", &record_path);
        let (modified, modified_text) =
            optional_timestamp(input.columns.field(row, "modified"), "modified", &record_path);
        let (accessed, accessed_text) =
            optional_timestamp(input.columns.field(row, "accessed"), "accessed", &record_path);

        let record = FileRecord {
            size,
            created,
            modified,
            accessed,
            hash: input.columns.field(row, "hash"),
            change: change_kind(&input.columns.field(row, "change"), &record_path),
            remark: input.columns.field(row, remark_column),
            unparsed: UnparsedCells {
                size: size_text,
                created: created_text,
                modified: modified_text,
                accessed: accessed_text,
            },
            path: record_path,
        };
        if !table.insert(record.path.clone(), record) {
            duplicates += 1;
        }
    }

    if duplicates > 0 {
        warn!("{} duplicate paths ignored in {}", duplicates, path.display());
    }
    info!("Loaded {} file records from {}", table.len(), path.display());
    Ok(table)
}

/// Load a registry snapshot and register the aliases of every row
pub fn load_registry_snapshot(path: &Path) -> Result<RegistrySnapshot> {
    let mut input = CsvInput::open(path, &["path", "value_name"])?;
    let rows = input.rows(path);

    let mut table = RegistrySnapshot::new();
    let mut duplicates = 0usize;
    for row in &rows {
        let key_path = input.columns.field(row, "path");
        if key_path.is_empty() {
            warn!("Skipping registry row without a path in {}", path.display());
            continue;
        }
        let value_name = input.columns.field(row, "value_name");
        let value_type = match input.columns.field(row, "value_type").trim() {
            "" if value_name.is_empty() => RegistryValueType::Key,
            name => RegistryValueType::from(name),
        };

        let (modified, modified_text) =
            optional_timestamp(input.columns.field(row, "modified"), "modified", &key_path);
        let record = RegistryRow {
            modified,
            value_type,
            value: input.columns.field(row, "value"),
            change: change_kind(&input.columns.field(row, "change"), &key_path),
            value_old: input.columns.field(row, "value_old"),
            unparsed: UnparsedCells {
                modified: modified_text,
                ..Default::default()
            },
            path: key_path,
            value_name,
        };
        if !table.insert(record.key(), record) {
            duplicates += 1;
        }
    }

    if duplicates > 0 {
        warn!("{} duplicate registry rows ignored in {}", duplicates, path.display());
    }
    let aliases = apply_registry_aliases(&mut table);
    info!(
        "Loaded {} registry rows ({} aliases) from {}",
        table.len(),
        aliases,
        path.display()
    );
    Ok(table)
}

/// Open a CSV writer, creating the parent directory when needed
pub(crate) fn create_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_path(path)?;
    Ok(writer)
}

/// Cell text: the typed value, else the text kept from a malformed cell
fn render_cell<T: ToString>(value: Option<T>, text: &Option<String>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => text.clone().unwrap_or_default(),
    }
}

/// Append one file record to an open writer
pub(crate) fn write_file_record(writer: &mut csv::Writer<File>, record: &FileRecord) -> Result<()> {
    let size = render_cell(record.size, &record.unparsed.size);
    let created = render_cell(record.created, &record.unparsed.created);
    let modified = render_cell(record.modified, &record.unparsed.modified);
    let accessed = render_cell(record.accessed, &record.unparsed.accessed);
    writer.write_record([
        record.path.as_str(),
        size.as_str(),
        created.as_str(),
        modified.as_str(),
        accessed.as_str(),
        record.hash.as_str(),
        record.change.as_str(),
        record.remark.as_str(),
    ])?;
    Ok(())
}

/// Append one registry row to an open writer
pub(crate) fn write_registry_row(writer: &mut csv::Writer<File>, row: &RegistryRow) -> Result<()> {
    let modified = render_cell(row.modified, &row.unparsed.modified);
    writer.write_record([
        row.path.as_str(),
        modified.as_str(),
        row.value_name.as_str(),
        row.value_type.as_str(),
        row.value.as_str(),
        row.change.as_str(),
        row.value_old.as_str(),
    ])?;
    Ok(())
}

/// Write a file snapshot
pub fn write_file_snapshot<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let mut writer = create_writer(path)?;
    writer.write_record(FILE_HEADER)?;
    let mut written = 0;
    for record in records {
        write_file_record(&mut writer, record)?;
        written += 1;
    }
    writer.flush()?;
    debug!("Wrote {} file records to {}", written, path.display());
    Ok(written)
}

/// Write a registry snapshot
pub fn write_registry_snapshot<'a, I>(path: &Path, rows: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a RegistryRow>,
{
    let mut writer = create_writer(path)?;
    writer.write_record(REGISTRY_HEADER)?;
    let mut written = 0;
    for row in rows {
        write_registry_row(&mut writer, row)?;
        written += 1;
    }
    writer.flush()?;
    debug!("Wrote {} registry rows to {}", written, path.display());
    Ok(written)
}
