//! Integration tests for complete investigations
//!
//! Each test walks through what an analyst does: fingerprint, change the
//! system, fingerprint again, diff, then filter the diff through a trace of
//! the process that made the change.

use ::winfingerprint::registry::{standard_hives, HiveExporter, HiveNode, HiveParser};
use ::winfingerprint::snapshot::{load_file_snapshot, load_registry_snapshot};
use ::winfingerprint::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::info;

/// A scratch directory tree plus an output directory for snapshots
pub struct InvestigationHarness {
    pub root: TempDir,
    pub out: TempDir,
    pub fingerprint: Fingerprint,
    rng: StdRng,
}

impl InvestigationHarness {
    /// Create a new harness with a seeded generator
    pub fn new(seed: u64) -> Self {
        Self {
            root: TempDir::new().unwrap(),
            out: TempDir::new().unwrap(),
            fingerprint: Fingerprint::builder().parallel_workers(4).build().unwrap(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Path inside the output directory
    pub fn out_path(&self, name: &str) -> PathBuf {
        self.out.path().join(name)
    }

    /// Write `count` files with random content under a few directories
    pub fn populate(&mut self, count: usize) -> Vec<PathBuf> {
        let mut created = Vec::with_capacity(count);
        for i in 0..count {
            let dir = self.root.path().join(format!("dir{}", i % 5));
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(format!("file{}.bin", i));
            let len = self.rng.random_range(1..2048);
            let content: Vec<u8> = (0..len).map(|_| self.rng.random()).collect();
            fs::write(&path, content).unwrap();
            created.push(path);
        }
        created
    }

    /// Fingerprint the tree into `name`
    pub fn snapshot(&self, name: &str) -> PathBuf {
        let output = self.out_path(name);
        self.fingerprint
            .fingerprint_files(self.root.path(), &output, None::<fn(ProgressInfo)>)
            .unwrap();
        output
    }
}

/// Exporter writing a marker file instead of calling `reg save`
struct MarkerExporter;

impl HiveExporter for MarkerExporter {
    fn export(&self, hive: &RegistryHiveDescriptor) -> Result<()> {
        fs::write(&hive.backing_file_path, hive.hive_root_name.as_bytes())?;
        Ok(())
    }
}

/// Parser returning a fixed key tree per hive, keyed by hive name
struct TreeParser {
    trees: BTreeMap<String, HiveNode>,
    calls: AtomicUsize,
}

impl HiveParser for TreeParser {
    fn parse(&self, hive: &RegistryHiveDescriptor) -> Result<HiveNode> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.trees
            .get(&hive.hive_root_name)
            .cloned()
            .ok_or_else(|| FingerprintError::hive_parse_failed(&hive.hive_root_name, "not a hive"))
    }
}

fn key(path: &str, values: Vec<(&str, RegistryValueData)>, subkeys: Vec<HiveNode>) -> HiveNode {
    HiveNode {
        path: path.to_string(),
        timestamp: Some(Timestamp::from_epoch_seconds(1_600_000_000.0)),
        values: values
            .into_iter()
            .map(|(name, value)| RegistryValueRecord {
                name: name.to_string(),
                value_type: match value {
                    RegistryValueData::Dword(_) => RegistryValueType::Dword,
                    _ => RegistryValueType::String,
                },
                value,
            })
            .collect(),
        subkeys,
    }
}

fn software_tree(version: &str) -> HiveNode {
    key(
        "ROOT",
        vec![],
        vec![key(
            "ROOT\\Vendor",
            vec![
                ("Version", RegistryValueData::Text(version.to_string())),
                ("Installed", RegistryValueData::Dword(1)),
            ],
            vec![],
        )],
    )
}

fn classes_tree() -> HiveNode {
    key(
        "CMI-CreateHive{6A1C4018-979D-4291-A7DC-7AED1C75B67C}",
        vec![],
        vec![key(
            "CMI-CreateHive{6A1C4018-979D-4291-A7DC-7AED1C75B67C}\\.vnd",
            vec![("", RegistryValueData::Text("Vendor.Document".to_string()))],
            vec![],
        )],
    )
}

fn collect_registry(harness: &InvestigationHarness, name: &str, trees: BTreeMap<String, HiveNode>) -> PathBuf {
    let output = harness.out_path(name);
    let parser = TreeParser {
        trees,
        calls: AtomicUsize::new(0),
    };
    let summary = harness
        .fingerprint
        .fingerprint_registry(&MarkerExporter, &parser, &standard_hives(&output), &output)
        .unwrap();
    info!("Collected {:?}, skipped {:?}", summary.parsed, summary.skipped);
    assert_eq!(parser.calls.load(Ordering::Relaxed), 7);
    output
}

fn write_trace(path: &Path, paths: &[&str]) {
    let mut content = String::from("\"Time of Day\",\"Process Name\",\"PID\",\"Operation\",\"Path\",\"Result\",\"Detail\"\r\n");
    for (i, accessed) in paths.iter().enumerate() {
        content.push_str(&format!(
            "\"10:00:{:02}\",\"vendor-setup.exe\",\"4711\",\"Access\",\"{}\",\"SUCCESS\",\"\"\r\n",
            i, accessed
        ));
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_file_investigation() {
    let mut harness = InvestigationHarness::new(42);
    let files = harness.populate(40);
    let before = harness.snapshot("before_files.csv");

    fs::write(&files[3], b"patched").unwrap();
    fs::remove_file(&files[7]).unwrap();
    let installed = harness.root.path().join("dir1").join("installed.dll");
    fs::write(&installed, b"MZ").unwrap();

    let after = harness.snapshot("after_files.csv");
    let diff_path = diff_output_path(harness.out.path(), &before, &after, SnapshotKind::Files);
    let stats = harness.fingerprint.diff_files(&before, &after, &diff_path).unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.deleted, 1);
    // The rewritten file changed at least in content; its directory may report a new mtime.
    assert!(stats.changed + stats.changed_silent >= 1);

    let diff_table = load_file_snapshot(&diff_path).unwrap();
    let patched = diff_table
        .get(&utils::display_path(&files[3]))
        .expect("patched file in diff");
    assert!(patched.remark.contains("hash (data) changed"), "{}", patched.remark);

    let procmon = harness.out_path("setup_trace.csv");
    let installed_path = utils::display_path(&installed);
    let untouched = utils::display_path(&files[10]);
    write_trace(&procmon, &[installed_path.as_str(), untouched.as_str()]);

    let registry_diff = harness.out_path("empty_registry.csv");
    fs::write(&registry_diff, "path,modified,value_name,value_type,value,change,value_old\n").unwrap();

    let summary = harness
        .fingerprint
        .filter_procmon(&procmon, &diff_path, &registry_diff, harness.out.path())
        .unwrap();
    assert_eq!(summary.report.events_kept, 1);
    assert_eq!(summary.report.files_kept, 1);

    let kept = load_file_snapshot(&summary.outputs.files).unwrap();
    assert_eq!(kept.records()[0].path, installed_path);
    assert_eq!(kept.records()[0].change, ChangeKind::Added);
}

#[test]
fn test_registry_investigation() {
    let harness = InvestigationHarness::new(7);

    let mut before_trees = BTreeMap::new();
    before_trees.insert("HKLM\\SOFTWARE".to_string(), software_tree("1.0"));
    let before = collect_registry(&harness, "before_registry.csv", before_trees);

    let mut after_trees = BTreeMap::new();
    after_trees.insert("HKLM\\SOFTWARE".to_string(), software_tree("2.0"));
    after_trees.insert("HKCR".to_string(), classes_tree());
    let after = collect_registry(&harness, "after_registry.csv", after_trees);

    // Exported copies are gone once collection finishes
    assert!(fs::read_dir(harness.out.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .all(|entry| entry.path().extension().and_then(|ext| ext.to_str()) != Some("hive")));

    let diff_path = diff_output_path(harness.out.path(), &before, &after, SnapshotKind::Registry);
    let stats = harness.fingerprint.diff_registry(&before, &after, &diff_path).unwrap();
    // HKCR root key, HKCR\.vnd key and its default value are new; Version changed
    assert_eq!(stats.added, 3);
    assert_eq!(stats.changed, 1);
    assert_eq!(stats.deleted, 0);

    let diff_table = load_registry_snapshot(&diff_path).unwrap();
    let version = diff_table
        .get(&RegistryKey::new("HKLM\\SOFTWARE\\Vendor", "Version"))
        .unwrap();
    assert_eq!(version.value_old, "1.0");
    assert_eq!(version.value, "2.0");

    // The installer writes the per-user view of the class key
    let procmon = harness.out_path("trace.csv");
    write_trace(
        &procmon,
        &[
            "HKCU\\Software\\Classes\\.vnd\\(default)",
            "HKLM\\SOFTWARE\\Vendor\\Version",
            "HKLM\\SOFTWARE\\Other",
        ],
    );
    let files = harness.out_path("no_files.csv");
    fs::write(&files, "path,size,created,modified,accessed,hash,change,remark\n").unwrap();

    let summary = harness
        .fingerprint
        .filter_procmon(&procmon, &files, &diff_path, harness.out.path())
        .unwrap();
    assert_eq!(summary.report.events_kept, 2);
    assert_eq!(summary.report.registry_kept, 2);

    let kept = load_registry_snapshot(&summary.outputs.registry).unwrap();
    let names: Vec<_> = kept.records().iter().map(|row| row.value_name.as_str()).collect();
    assert!(names.contains(&"Version"));
    assert!(names.contains(&DEFAULT_VALUE_NAME));
}

#[test]
fn test_registry_truncation_in_pipeline() {
    let harness = InvestigationHarness::new(1);
    let fingerprint = Fingerprint::builder().field_length_limit(8).build().unwrap();
    let mut trees = BTreeMap::new();
    trees.insert(
        "HKLM\\SYSTEM".to_string(),
        key(
            "ROOT",
            vec![("Blob", RegistryValueData::Text("0123456789abcdef".to_string()))],
            vec![],
        ),
    );
    let output = harness.out_path("limited_registry.csv");
    let parser = TreeParser {
        trees,
        calls: AtomicUsize::new(0),
    };
    let summary = fingerprint
        .fingerprint_registry(&MarkerExporter, &parser, &standard_hives(&output), &output)
        .unwrap();

    assert_eq!(summary.parsed, vec!["HKLM\\SYSTEM"]);
    assert_eq!(summary.skipped.len(), 6);
    assert_eq!(summary.written.truncated, 1);

    let table = load_registry_snapshot(&output).unwrap();
    let blob = table.get(&RegistryKey::new("HKLM\\SYSTEM\\", "Blob")).unwrap();
    assert_eq!(blob.value, "01234567");
}
