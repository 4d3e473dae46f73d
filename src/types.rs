//! Core data types used throughout the fingerprint library
//!
//! This module contains the record store shared by every component: the
//! file and registry records read from and written to snapshots, the change
//! classification the diff engine attaches to them, and the configuration
//! value handed to each pipeline.
//!
//! ## Overview
//!
//! - **Time**: [`Timestamp`] keeps one canonical epoch value and derives its
//!   calendar rendering, so the two views can never disagree
//! - **Files**: [`FileRecord`] is one row of a file snapshot
//! - **Registry**: [`RegistryEntryRecord`] is one key with its values as
//!   collected from a hive; [`RegistryRow`] is the flat CSV row keyed by
//!   [`RegistryKey`]
//! - **Diffing**: [`ChangeKind`] and [`DiffStats`]
//! - **Configuration**: [`FingerprintConfig`]
//!
//! ## Examples
//!
//! ```rust
//! use winfingerprint::types::{FileRecord, Timestamp};
//!
//! let mut record = FileRecord::new("C:\\Temp\\a.txt");
//! record.size = Some(10);
//! record.modified = Some(Timestamp::from_epoch_seconds(1_546_300_800.25));
//! assert_eq!(
//!     record.modified.unwrap().render(),
//!     "2019-01-01 00:00:00.250000"
//! );
//! ```

use crate::diff::FieldComparisonPolicy;
use crate::error::{FingerprintError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Calendar format used when a timestamp is written to a snapshot
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Parse format accepting an optional fractional part
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A point in time with microsecond resolution
///
/// The canonical form is the number of microseconds since the Unix epoch.
/// The epoch-seconds float and the calendar rendering are both derived from
/// it, which keeps them in agreement by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// Build a timestamp from seconds since the Unix epoch
    pub fn from_epoch_seconds(seconds: f64) -> Self {
        Self {
            micros: (seconds * 1_000_000.0).round() as i64,
        }
    }

    /// Build a timestamp from microseconds since the Unix epoch
    pub fn from_epoch_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Build a timestamp from a calendar time
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self {
            micros: datetime.timestamp_micros(),
        }
    }

    /// Build a timestamp from a filesystem time
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self {
                micros: after.as_micros() as i64,
            },
            Err(before) => Self {
                micros: -(before.duration().as_micros() as i64),
            },
        }
    }

    /// Seconds since the Unix epoch
    pub fn as_epoch_seconds(&self) -> f64 {
        self.micros as f64 / 1_000_000.0
    }

    /// Microseconds since the Unix epoch
    pub fn epoch_micros(&self) -> i64 {
        self.micros
    }

    /// Calendar view of this timestamp (UTC)
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let seconds = self.micros.div_euclid(1_000_000);
        let nanos = (self.micros.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::<Utc>::from_timestamp(seconds, nanos).unwrap_or_default()
    }

    /// Rendering stored in snapshot files
    pub fn render(&self) -> String {
        self.to_datetime().format(TIMESTAMP_FORMAT).to_string()
    }

    /// Parse a snapshot field
    ///
    /// Accepts the calendar rendering (fraction optional), RFC 3339, or a
    /// bare epoch-seconds number.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIMESTAMP_PARSE_FORMAT) {
            return Ok(Self::from_datetime(Utc.from_utc_datetime(&naive)));
        }
        if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self::from_datetime(datetime.with_timezone(&Utc)));
        }
        if let Ok(seconds) = text.parse::<f64>() {
            if seconds.is_finite() {
                return Ok(Self::from_epoch_seconds(seconds));
            }
        }
        Err(FingerprintError::InvalidRecord(format!("unparseable timestamp {:?}", text)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for Timestamp {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Classification attached to a record by the diff engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Not classified (fresh snapshot rows)
    #[default]
    Unset,
    /// Present only in the later snapshot
    Added,
    /// Present only in the earlier snapshot
    Deleted,
    /// Changed, with a visible timestamp signal
    Changed,
    /// Content changed while the timestamps stayed the same
    ChangedSilent,
}

impl ChangeKind {
    /// Column value written to snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Unset => "",
            ChangeKind::Added => "ADDED",
            ChangeKind::Deleted => "DELETED",
            ChangeKind::Changed => "CHANGED",
            ChangeKind::ChangedSilent => "CHANGED_SILENT",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Ok(ChangeKind::Unset),
            "ADDED" => Ok(ChangeKind::Added),
            "DELETED" => Ok(ChangeKind::Deleted),
            "CHANGED" => Ok(ChangeKind::Changed),
            "CHANGED_SILENT" => Ok(ChangeKind::ChangedSilent),
            other => Err(FingerprintError::InvalidRecord(format!("unknown change kind {:?}", other))),
        }
    }
}

/// One filesystem entry of a file snapshot
///
/// `path` is unique within one snapshot. Metadata fields are optional so a
/// record whose metadata could not be read (or was malformed on disk) is
/// still carried and diffed with whatever it does have.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileRecord {
    /// Full path of the entry
    pub path: String,
    /// Size in bytes
    pub size: Option<u64>,
    /// Creation time
    pub created: Option<Timestamp>,
    /// Last modification time
    pub modified: Option<Timestamp>,
    /// Last access time
    pub accessed: Option<Timestamp>,
    /// Hex SHA-256 of the content; empty when hashing was skipped or denied
    pub hash: String,
    /// Diff classification
    pub change: ChangeKind,
    /// Free-text annotation ("access denied", or the list of changed fields)
    pub remark: String,
    /// Metadata cells that were on disk but did not parse
    pub unparsed: UnparsedCells,
}

/// Snapshot cells kept verbatim because they did not parse
///
/// The matching typed field stays `None`. Keeping the text lets two
/// different malformed cells still compare unequal, and writes them back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnparsedCells {
    /// Size cell
    pub size: Option<String>,
    /// Creation time cell
    pub created: Option<String>,
    /// Modification time cell (also the key last write time of registry rows)
    pub modified: Option<String>,
    /// Access time cell
    pub accessed: Option<String>,
}

impl FileRecord {
    /// Create an empty record for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Registry value types as named by the hive parser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RegistryValueType {
    /// Synthetic type of the row describing the key itself
    #[default]
    Key,
    /// REG_NONE
    None,
    /// REG_SZ
    String,
    /// REG_EXPAND_SZ
    ExpandString,
    /// REG_BINARY
    Binary,
    /// REG_DWORD
    Dword,
    /// REG_DWORD_BIG_ENDIAN
    DwordBigEndian,
    /// REG_LINK
    Link,
    /// REG_MULTI_SZ
    MultiString,
    /// REG_RESOURCE_LIST
    ResourceList,
    /// REG_FULL_RESOURCE_DESCRIPTOR
    FullResourceDescriptor,
    /// REG_RESOURCE_REQUIREMENTS_LIST
    ResourceRequirementsList,
    /// REG_QWORD
    Qword,
    /// Any spelling not listed above, kept verbatim
    Other(String),
}

impl RegistryValueType {
    /// Column value written to snapshots
    pub fn as_str(&self) -> &str {
        match self {
            RegistryValueType::Key => "KEY",
            RegistryValueType::None => "RegNone",
            RegistryValueType::String => "RegSZ",
            RegistryValueType::ExpandString => "RegExpandSZ",
            RegistryValueType::Binary => "RegBin",
            RegistryValueType::Dword => "RegDWord",
            RegistryValueType::DwordBigEndian => "RegBigEndian",
            RegistryValueType::Link => "RegLink",
            RegistryValueType::MultiString => "RegMultiSZ",
            RegistryValueType::ResourceList => "RegResourceList",
            RegistryValueType::FullResourceDescriptor => "RegFullResourceDescriptor",
            RegistryValueType::ResourceRequirementsList => "RegResourceRequirementsList",
            RegistryValueType::Qword => "RegQWord",
            RegistryValueType::Other(name) => name,
        }
    }
}

impl fmt::Display for RegistryValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RegistryValueType {
    fn from(name: &str) -> Self {
        match name.trim() {
            "KEY" => RegistryValueType::Key,
            "RegNone" => RegistryValueType::None,
            "RegSZ" => RegistryValueType::String,
            "RegExpandSZ" => RegistryValueType::ExpandString,
            "RegBin" => RegistryValueType::Binary,
            "RegDWord" => RegistryValueType::Dword,
            "RegBigEndian" => RegistryValueType::DwordBigEndian,
            "RegLink" => RegistryValueType::Link,
            "RegMultiSZ" => RegistryValueType::MultiString,
            "RegResourceList" => RegistryValueType::ResourceList,
            "RegFullResourceDescriptor" => RegistryValueType::FullResourceDescriptor,
            "RegResourceRequirementsList" => RegistryValueType::ResourceRequirementsList,
            "RegQWord" => RegistryValueType::Qword,
            other => RegistryValueType::Other(other.to_string()),
        }
    }
}

/// Stored in place of a value the parser could not decode
pub const UNREADABLE_VALUE: &str = "ERROR: can not be parsed or access denied";

/// Decoded registry value data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValueData {
    /// No data
    Empty,
    /// Text data (REG_SZ, REG_EXPAND_SZ, REG_LINK)
    Text(String),
    /// Raw bytes (REG_BINARY, resource lists, REG_NONE)
    Binary(Vec<u8>),
    /// 32-bit integer
    Dword(u32),
    /// 64-bit integer
    Qword(u64),
    /// REG_MULTI_SZ
    MultiText(Vec<String>),
    /// The value could not be parsed or read
    Unreadable,
}

impl RegistryValueData {
    /// String form stored in snapshots
    ///
    /// Binary data is hex encoded and multi-strings become a JSON array.
    pub fn render(&self) -> String {
        match self {
            RegistryValueData::Empty => String::new(),
            RegistryValueData::Text(text) => text.clone(),
            RegistryValueData::Binary(bytes) => hex::encode(bytes),
            RegistryValueData::Dword(value) => value.to_string(),
            RegistryValueData::Qword(value) => value.to_string(),
            RegistryValueData::MultiText(items) => serde_json::to_string(items).unwrap_or_default(),
            RegistryValueData::Unreadable => UNREADABLE_VALUE.to_string(),
        }
    }
}

/// One value of a registry key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValueRecord {
    /// Value name; empty for the key's default value
    pub name: String,
    /// Value type
    pub value_type: RegistryValueType,
    /// Value data
    pub value: RegistryValueData,
}

/// Name under which the default value of a key is written to snapshots
///
/// The empty name is reserved for the KEY row itself.
pub const DEFAULT_VALUE_NAME: &str = "(default)";

impl RegistryValueRecord {
    /// Name as written to the `value_name` column
    pub fn row_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_VALUE_NAME
        } else {
            &self.name
        }
    }
}

/// One registry key with its values, as collected from a hive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryEntryRecord {
    /// Hive-qualified key path, e.g. `HKLM\SOFTWARE\Microsoft`
    pub path: String,
    /// Last write time of the key
    pub modified: Option<Timestamp>,
    /// Values of the key
    pub values: Vec<RegistryValueRecord>,
}

impl RegistryEntryRecord {
    /// Flatten into snapshot rows: the KEY row first, then one row per value
    pub fn rows(&self) -> Vec<RegistryRow> {
        let mut rows = Vec::with_capacity(self.values.len() + 1);
        rows.push(RegistryRow::key_row(&self.path, self.modified));
        for value in &self.values {
            rows.push(RegistryRow {
                path: self.path.clone(),
                modified: self.modified,
                value_name: value.row_name().to_string(),
                value_type: value.value_type.clone(),
                value: value.value.render(),
                change: ChangeKind::Unset,
                value_old: String::new(),
                unparsed: UnparsedCells::default(),
            });
        }
        rows
    }
}

/// Identity of a registry row: key path plus value name (empty for the key itself)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey {
    /// Key path
    pub path: String,
    /// Value name
    pub value_name: String,
}

impl RegistryKey {
    /// Build a key
    pub fn new(path: impl Into<String>, value_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value_name: value_name.into(),
        }
    }
}

/// One row of a registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryRow {
    /// Key path
    pub path: String,
    /// Last write time of the key
    pub modified: Option<Timestamp>,
    /// Value name, empty on the KEY row
    pub value_name: String,
    /// Value type, `KEY` for the key row
    pub value_type: RegistryValueType,
    /// Rendered (possibly truncated) value
    pub value: String,
    /// Diff classification
    pub change: ChangeKind,
    /// Previous value when the diff found a value change
    pub value_old: String,
    /// `modified` cell that was on disk but did not parse
    pub unparsed: UnparsedCells,
}

impl RegistryRow {
    /// Row describing the presence of a key
    pub fn key_row(path: &str, modified: Option<Timestamp>) -> Self {
        Self {
            path: path.to_string(),
            modified,
            value_type: RegistryValueType::Key,
            ..Default::default()
        }
    }

    /// Identity used for diffing
    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(self.path.clone(), self.value_name.clone())
    }

    /// Path under which a process monitor reports access to this row
    ///
    /// Key rows are reported by key path; values by `path\value_name`.
    pub fn access_path(&self) -> String {
        if self.value_name.is_empty() {
            self.path.clone()
        } else {
            format!("{}\\{}", self.path, self.value_name)
        }
    }
}

/// A registry hive to export and parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHiveDescriptor {
    /// Root name, e.g. `HKLM\SAM` or `HKU\S-1-5-18`
    pub hive_root_name: String,
    /// Where the exported copy of the hive is written
    pub backing_file_path: PathBuf,
    /// Human readable name, e.g. `HKEY_LOCAL_MACHINE\SAM`
    pub display_comment: String,
}

/// Counts of classified records produced by a diff
///
/// # Examples
///
/// ```rust
/// # use winfingerprint::types::{ChangeKind, DiffStats};
/// let mut stats = DiffStats::default();
/// stats.record(ChangeKind::Added);
/// stats.record(ChangeKind::ChangedSilent);
/// assert_eq!(stats.total(), 2);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Records only in the later snapshot
    pub added: usize,
    /// Records only in the earlier snapshot
    pub deleted: usize,
    /// Records changed with a timestamp signal
    pub changed: usize,
    /// Records changed without a timestamp signal
    pub changed_silent: usize,
}

impl DiffStats {
    /// Count one classified record
    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Added => self.added += 1,
            ChangeKind::Deleted => self.deleted += 1,
            ChangeKind::Changed => self.changed += 1,
            ChangeKind::ChangedSilent => self.changed_silent += 1,
            ChangeKind::Unset => {}
        }
    }

    /// Total number of deltas
    pub fn total(&self) -> usize {
        self.added + self.deleted + self.changed + self.changed_silent
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Progress callback information for long-running collection
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

/// Default field length limit: the maximum length of a spreadsheet cell
pub const DEFAULT_FIELD_LENGTH_LIMIT: usize = 32767;

/// Configuration passed explicitly into every pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Registry values longer than this are truncated (0 = unlimited)
    pub field_length_limit: usize,
    /// Report registry keys whose only difference is the last write time
    pub check_modified: bool,
    /// Hash file contents during collection
    pub hash_files: bool,
    /// Keep exported hive copies after parsing
    pub retain_hive_copies: bool,
    /// Worker threads for file hashing
    pub parallel_workers: usize,
    /// Follow symbolic links during collection
    pub follow_symlinks: bool,
    /// Glob patterns excluded from file collection
    pub exclude_patterns: Vec<String>,
    /// Extra arguments for hive export, e.g. `/reg:64`
    pub reg_save_args: Vec<String>,
    /// Field roles for the file diff
    pub file_policy: FieldComparisonPolicy,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            field_length_limit: DEFAULT_FIELD_LENGTH_LIMIT,
            check_modified: false,
            hash_files: true,
            retain_hive_copies: false,
            parallel_workers: num_cpus::get().max(1),
            follow_symlinks: false,
            exclude_patterns: Vec::new(),
            reg_save_args: Vec::new(),
            file_policy: FieldComparisonPolicy::files(),
        }
    }
}

impl FingerprintConfig {
    /// Field roles for the registry diff under this configuration
    pub fn registry_policy(&self) -> FieldComparisonPolicy {
        FieldComparisonPolicy::registry(self.check_modified)
    }
}
