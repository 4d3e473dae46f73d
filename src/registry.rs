//! Registry collection
//!
//! Collecting a registry fingerprint happens in three steps:
//!
//! 1. **Export**: every hive is saved to a file next to the output snapshot
//!    (`reg save`). Saving needs administrative rights; a hive that fails is
//!    logged and left out, the others carry on.
//! 2. **Parse**: each exported copy is handed to a [`HiveParser`], which
//!    returns the key tree, and the tree is flattened into one
//!    [`RegistryEntryRecord`] per key.
//! 3. **Write**: entries are written as snapshot rows. Values longer than
//!    the field length limit are truncated, each truncation is logged, and
//!    the longest value of the run is reported at the end.
//!
//! Exported copies are removed when collection finishes, whatever the
//! outcome, unless retention was requested.

use crate::error::{FingerprintError, Result};
use crate::snapshot::{create_writer, write_registry_row, REGISTRY_HEADER};
use crate::types::{RegistryEntryRecord, RegistryHiveDescriptor, RegistryValueRecord, Timestamp};
use crate::utils::snapshot_name;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, warn};

/// Machine-wide hives, with their long names
pub const STANDARD_HIVES: [(&str, &str); 7] = [
    ("HKLM\\SAM", "HKEY_LOCAL_MACHINE\\SAM"),
    ("HKLM\\SECURITY", "HKEY_LOCAL_MACHINE\\SECURITY"),
    ("HKLM\\SOFTWARE", "HKEY_LOCAL_MACHINE\\SOFTWARE"),
    ("HKLM\\SYSTEM", "HKEY_LOCAL_MACHINE\\SYSTEM"),
    ("HKCR", "HKEY_CLASSES_ROOT"),
    ("HKCU", "HKEY_CURRENT_USER"),
    ("HKCC", "HKEY_CURRENT_CONFIGURATION"),
];

const PROFILE_LIST_KEY: &str = "HKLM\\SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\ProfileList";

/// Where the exported copy of a hive goes, next to the output snapshot
///
/// `out/host_reg.csv` and `HKLM\SAM` give `out/host_reg_registry_hklm_sam.hive`.
pub fn hive_copy_path(output: &Path, hive_root_name: &str) -> PathBuf {
    let hive = hive_root_name.replace('\\', "_").to_lowercase();
    let file_name = format!("{}_registry_{}.hive", snapshot_name(output), hive);
    match output.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Descriptors for the machine-wide hives
pub fn standard_hives(output: &Path) -> Vec<RegistryHiveDescriptor> {
    STANDARD_HIVES
        .iter()
        .map(|(name, comment)| RegistryHiveDescriptor {
            hive_root_name: name.to_string(),
            backing_file_path: hive_copy_path(output, name),
            display_comment: comment.to_string(),
        })
        .collect()
}

/// Descriptors for the loaded user hives (`HKU\<sid>`)
///
/// The comment names the user when `resolver` knows it.
pub fn user_hives(output: &Path, sids: &[String], resolver: &dyn SidResolver) -> Vec<RegistryHiveDescriptor> {
    sids.iter()
        .map(|sid| {
            let name = format!("HKU\\{}", sid);
            let mut comment = format!("HKEY_USERS\\{}", sid);
            let username = resolver.username(sid);
            if !username.is_empty() {
                comment = format!("{} ({})", comment, username);
            }
            RegistryHiveDescriptor {
                backing_file_path: hive_copy_path(output, &name),
                hive_root_name: name,
                display_comment: comment,
            }
        })
        .collect()
}

/// Maps a security identifier to a user name
///
/// Best effort: an unknown SID gives an empty string.
pub trait SidResolver {
    /// User name of `sid`
    fn username(&self, sid: &str) -> String;
}

impl<F> SidResolver for F
where
    F: Fn(&str) -> String,
{
    fn username(&self, sid: &str) -> String {
        self(sid)
    }
}

/// Saves a hive to its backing file
pub trait HiveExporter {
    /// Export `hive` to `hive.backing_file_path`
    fn export(&self, hive: &RegistryHiveDescriptor) -> Result<()>;
}

/// Exports hives with `reg save <hive> <file> /y`
#[derive(Debug, Clone, Default)]
pub struct RegSaveExporter {
    extra_args: Vec<String>,
}

impl RegSaveExporter {
    /// Create an exporter passing `extra_args` after `/y` (e.g. `/reg:64`)
    pub fn new(extra_args: Vec<String>) -> Self {
        Self { extra_args }
    }
}

impl HiveExporter for RegSaveExporter {
    fn export(&self, hive: &RegistryHiveDescriptor) -> Result<()> {
        if let Some(dir) = hive.backing_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let output = Command::new("reg")
            .arg("save")
            .arg(&hive.hive_root_name)
            .arg(&hive.backing_file_path)
            .arg("/y")
            .args(&self.extra_args)
            .output()
            .map_err(|e| FingerprintError::hive_export_failed(&hive.hive_root_name, e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FingerprintError::hive_export_failed(
                &hive.hive_root_name,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        debug!("Saved {} to {}", hive.hive_root_name, hive.backing_file_path.display());
        Ok(())
    }
}

/// Reads live registry data through `reg query`
#[derive(Debug, Clone, Copy, Default)]
pub struct RegQuery;

impl RegQuery {
    fn query(&self, args: &[&str]) -> Option<String> {
        match Command::new("reg").arg("query").args(args).output() {
            Ok(output) if output.status.success() => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(output) => {
                debug!("reg query {:?} failed: {}", args, output.status);
                None
            }
            Err(e) => {
                debug!("reg query {:?} could not run: {}", args, e);
                None
            }
        }
    }

    /// Names of the hives loaded under `HKU`, sorted
    pub fn user_sids(&self) -> Vec<String> {
        match self.query(&["HKU"]) {
            Some(output) => parse_subkeys(&output, "HKEY_USERS"),
            None => {
                warn!("Could not list the user hives under HKU");
                Vec::new()
            }
        }
    }
}

impl SidResolver for RegQuery {
    fn username(&self, sid: &str) -> String {
        let key = format!("{}\\{}", PROFILE_LIST_KEY, sid);
        self.query(&[key.as_str(), "/v", "ProfileImagePath"])
            .and_then(|output| parse_profile_image_path(&output))
            .unwrap_or_default()
    }
}

/// Direct subkey names of `root` in `reg query` output, sorted
pub fn parse_subkeys(output: &str, root: &str) -> Vec<String> {
    let prefix = format!("{}\\", root);
    let mut names: Vec<String> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .filter(|name| !name.is_empty() && !name.contains('\\'))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

/// User name from a `reg query ... /v ProfileImagePath` listing
///
/// The name is the last segment of the profile directory.
pub fn parse_profile_image_path(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("ProfileImagePath")?;
        let (_, data) = rest.trim_start().split_once(char::is_whitespace)?;
        data.trim()
            .rsplit_once('\\')
            .map(|(_, user)| user.to_string())
            .filter(|user| !user.is_empty())
    })
}

/// One key of a parsed hive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiveNode {
    /// Key path as the parser reports it, relative to the hive
    pub path: String,
    /// Last write time
    pub timestamp: Option<Timestamp>,
    /// Values of the key
    pub values: Vec<RegistryValueRecord>,
    /// Subkeys
    pub subkeys: Vec<HiveNode>,
}

/// Reads an exported hive file into a key tree
pub trait HiveParser {
    /// Parse the backing file of `hive`
    fn parse(&self, hive: &RegistryHiveDescriptor) -> Result<HiveNode>;
}

/// Qualify a parser key path with the hive name
///
/// Parsers report the hive root under an internal name (`ROOT`, or
/// `CMI-CreateHive{...}`); that segment is dropped.
pub fn format_key_path(hive_root_name: &str, key_path: &str) -> String {
    let key_path = if key_path == "ROOT" || key_path.starts_with("ROOT\\") || key_path.starts_with("CMI-CreateHive") {
        key_path.split_once('\\').map(|(_, rest)| rest).unwrap_or("")
    } else {
        key_path
    };
    format!("{}\\{}", hive_root_name, key_path)
}

/// Flatten a key tree, parents before children, siblings in parser order
pub fn flatten_hive(hive_root_name: &str, root: &HiveNode) -> Vec<RegistryEntryRecord> {
    let mut entries = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        entries.push(RegistryEntryRecord {
            path: format_key_path(hive_root_name, &node.path),
            modified: node.timestamp,
            values: node.values.clone(),
        });
        stack.extend(node.subkeys.iter().rev());
    }
    entries
}

/// Exported hive files, deleted on drop unless retained
#[derive(Debug)]
pub struct HiveCopies {
    copies: Vec<RegistryHiveDescriptor>,
    retain: bool,
}

impl HiveCopies {
    /// Track nothing yet
    pub fn new(retain: bool) -> Self {
        Self {
            copies: Vec::new(),
            retain,
        }
    }

    /// Track an exported hive
    pub fn push(&mut self, hive: RegistryHiveDescriptor) {
        self.copies.push(hive);
    }

    /// Exported hives
    pub fn iter(&self) -> std::slice::Iter<'_, RegistryHiveDescriptor> {
        self.copies.iter()
    }

    /// Number of exported hives
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// Whether nothing was exported
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Keep the files and hand back their descriptors
    pub fn keep(mut self) -> Vec<RegistryHiveDescriptor> {
        self.retain = true;
        std::mem::take(&mut self.copies)
    }
}

impl Drop for HiveCopies {
    fn drop(&mut self) {
        if self.retain || self.copies.is_empty() {
            return;
        }
        info!("Deleting {} registry hive copies", self.copies.len());
        for hive in &self.copies {
            match fs::remove_file(&hive.backing_file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!("Could not delete {}: {}", hive.backing_file_path.display(), e),
            }
        }
    }
}

/// Result of a collection run
#[derive(Debug, Clone, Default)]
pub struct RegistryCollection {
    /// Keys of every parsed hive, hive by hive
    pub entries: Vec<RegistryEntryRecord>,
    /// Hives that were exported and parsed
    pub parsed: Vec<String>,
    /// Hives left out because export or parsing failed
    pub skipped: Vec<String>,
}

/// Drives export and parsing of a set of hives
pub struct RegistryCollector<'a> {
    exporter: &'a dyn HiveExporter,
    parser: &'a dyn HiveParser,
    retain_hive_copies: bool,
}

impl<'a> RegistryCollector<'a> {
    /// Create a collector
    pub fn new(exporter: &'a dyn HiveExporter, parser: &'a dyn HiveParser) -> Self {
        Self {
            exporter,
            parser,
            retain_hive_copies: false,
        }
    }

    /// Keep exported hive files after parsing
    pub fn with_retain_hive_copies(mut self, retain: bool) -> Self {
        self.retain_hive_copies = retain;
        self
    }

    /// Export every hive; failures are logged and skipped
    pub fn export(&self, hives: &[RegistryHiveDescriptor], skipped: &mut Vec<String>) -> HiveCopies {
        let mut copies = HiveCopies::new(self.retain_hive_copies);
        for hive in hives {
            info!("Saving registry hive {} ({})", hive.hive_root_name, hive.display_comment);
            match self.exporter.export(hive) {
                Ok(()) => copies.push(hive.clone()),
                Err(e) => {
                    error!("{}", e.user_message());
                    debug!("{}", e);
                    skipped.push(hive.hive_root_name.clone());
                }
            }
        }
        copies
    }

    /// Export and parse every hive
    pub fn collect(&self, hives: &[RegistryHiveDescriptor]) -> RegistryCollection {
        let mut collection = RegistryCollection::default();
        let copies = self.export(hives, &mut collection.skipped);

        for hive in copies.iter() {
            info!("Parsing registry hive {}", hive.hive_root_name);
            match self.parser.parse(hive) {
                Ok(root) => {
                    let entries = flatten_hive(&hive.hive_root_name, &root);
                    debug!("{} keys in {}", entries.len(), hive.hive_root_name);
                    collection.entries.extend(entries);
                    collection.parsed.push(hive.hive_root_name.clone());
                }
                Err(e) => {
                    error!("{}", e);
                    collection.skipped.push(hive.hive_root_name.clone());
                }
            }
        }
        collection
    }
}

/// The longest value seen while writing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongestValue {
    /// Key path
    pub key: String,
    /// Value name
    pub value_name: String,
    /// Rendered length in characters
    pub length: usize,
}

/// Counts from [`write_registry_entries`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TruncationReport {
    /// Keys written
    pub keys_written: usize,
    /// Value rows written
    pub values_written: usize,
    /// Values truncated to the limit
    pub truncated: usize,
    /// Longest value before truncation
    pub longest: Option<LongestValue>,
}

/// First `limit` characters of `value` (0 = no limit)
pub fn truncate_value(value: &str, limit: usize) -> &str {
    if limit == 0 {
        return value;
    }
    match value.char_indices().nth(limit) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// Write collected entries as a registry snapshot
///
/// Values longer than `field_length_limit` characters are written truncated.
pub fn write_registry_entries(
    path: &Path,
    entries: &[RegistryEntryRecord],
    field_length_limit: usize,
) -> Result<TruncationReport> {
    info!("Writing registry fingerprint to {}", path.display());
    let mut writer = create_writer(path)?;
    writer.write_record(REGISTRY_HEADER)?;
    let mut report = TruncationReport::default();

    for entry in entries {
        report.keys_written += 1;
        for mut row in entry.rows() {
            if !row.value_name.is_empty() {
                report.values_written += 1;
                let length = row.value.chars().count();
                if report.longest.as_ref().map_or(length > 0, |longest| length > longest.length) {
                    report.longest = Some(LongestValue {
                        key: row.path.clone(),
                        value_name: row.value_name.clone(),
                        length,
                    });
                }
                if field_length_limit > 0 && length > field_length_limit {
                    warn!(
                        "{}",
                        FingerprintError::FieldTruncated {
                            key: row.path.clone(),
                            value_name: row.value_name.clone(),
                            length,
                            limit: field_length_limit,
                        }
                    );
                    row.value = truncate_value(&row.value, field_length_limit).to_string();
                    report.truncated += 1;
                }
            }
            write_registry_row(&mut writer, &row)?;
        }
    }
    writer.flush()?;

    match &report.longest {
        Some(longest) => info!(
            "{} registry keys written, longest value: key {}, value name {}, length {}",
            report.keys_written, longest.key, longest.value_name, longest.length
        ),
        None => info!("{} registry keys written", report.keys_written),
    }
    Ok(report)
}
