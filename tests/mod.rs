//! Main test module for winfingerprint
//!
//! This module includes all test suites:
//! - Integration tests for complete investigations
//! - Property-based tests for diff, aliasing and correlation invariants
//! - Edge cases of snapshot input

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::winfingerprint::snapshot::{load_file_snapshot, load_registry_snapshot};
    use ::winfingerprint::*;
    use std::fs;
    use tempfile::TempDir;

    const FILE_HEADER: &str = "path,size,created,modified,accessed,hash,change,remark\n";
    const REGISTRY_HEADER: &str = "path,modified,value_name,value_type,value,change,value_old\n";

    #[test]
    fn test_identical_snapshots_produce_empty_diff() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("same.csv");
        fs::write(
            &snapshot,
            format!("{}C:\\a,1,2020-01-01 00:00:00,2020-01-01 00:00:00,,h,,\n", FILE_HEADER),
        )
        .unwrap();

        let fingerprint = Fingerprint::builder().build().unwrap();
        let output = dir.path().join("diff.csv");
        let stats = fingerprint.diff_files(&snapshot, &snapshot, &output).unwrap();
        assert!(!stats.has_changes());

        // Header only
        let written = fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[test]
    fn test_missing_before_snapshot_is_fatal() {
        let dir = TempDir::new().unwrap();
        let after = dir.path().join("after.csv");
        fs::write(&after, FILE_HEADER).unwrap();

        let fingerprint = Fingerprint::builder().build().unwrap();
        let output = dir.path().join("diff.csv");
        let err = fingerprint
            .diff_files(&dir.path().join("nope.csv"), &after, &output)
            .unwrap_err();
        assert!(matches!(err, FingerprintError::SnapshotUnreadable { .. }));
        assert!(err.is_fatal());
        assert!(!output.exists());
    }

    #[test]
    fn test_procmon_without_path_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let procmon = dir.path().join("trace.csv");
        fs::write(&procmon, "Time of Day,Operation\n10:00,ReadFile\n").unwrap();
        let files = dir.path().join("files.csv");
        fs::write(&files, FILE_HEADER).unwrap();
        let registry = dir.path().join("registry.csv");
        fs::write(&registry, REGISTRY_HEADER).unwrap();

        let fingerprint = Fingerprint::builder().build().unwrap();
        let err = fingerprint
            .filter_procmon(&procmon, &files, &registry, dir.path())
            .unwrap_err();
        assert!(matches!(err, FingerprintError::SnapshotUnreadable { .. }));
    }

    #[test]
    fn test_hku_default_and_classes_rows_resolve_as_hkcu() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("before.csv");
        let after = dir.path().join("after.csv");
        fs::write(
            &before,
            format!(
                "{}HKU\\.DEFAULT\\Control Panel,,,KEY,,,\n\
                 HKU\\S-1-5-21-7_Classes\\S-1-5-21-7_Classes\\.log,,,KEY,,,\n",
                REGISTRY_HEADER
            ),
        )
        .unwrap();
        fs::write(
            &after,
            format!(
                "{}HKCU\\Control Panel,,,KEY,,,\n\
                 HKCU\\Software\\Classes\\.log,,,KEY,,,\n",
                REGISTRY_HEADER
            ),
        )
        .unwrap();

        let before_table = load_registry_snapshot(&before).unwrap();
        let after_table = load_registry_snapshot(&after).unwrap();
        let outcome = diff(&before_table, &after_table, &FieldComparisonPolicy::registry(false));
        assert_eq!(outcome.stats.total(), 0, "{:?}", outcome.records);
    }

    #[test]
    fn test_two_rows_sharing_an_alias_consume_once() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("before.csv");
        let after = dir.path().join("after.csv");
        fs::write(&before, format!("{}HKCR\\.zip,,,KEY,,,\n", REGISTRY_HEADER)).unwrap();
        fs::write(
            &after,
            format!(
                "{}HKCR\\.zip,,,KEY,,,\n\
                 HKCU\\Software\\Classes\\.zip,,,KEY,,,\n",
                REGISTRY_HEADER
            ),
        )
        .unwrap();

        let before_table = load_registry_snapshot(&before).unwrap();
        let after_table = load_registry_snapshot(&after).unwrap();
        let outcome = diff(&before_table, &after_table, &FieldComparisonPolicy::registry(false));
        assert_eq!(outcome.stats.added, 1);
        assert_eq!(outcome.stats.deleted, 0);
        assert_eq!(outcome.records[0].path, "HKCU\\Software\\Classes\\.zip");

        // Same rows, other order: the unchanged HKCR key still matches itself
        fs::write(
            &after,
            format!(
                "{}HKCU\\Software\\Classes\\.zip,,,KEY,,,\n\
                 HKCR\\.zip,,,KEY,,,\n",
                REGISTRY_HEADER
            ),
        )
        .unwrap();
        let after_table = load_registry_snapshot(&after).unwrap();
        let outcome = diff(&before_table, &after_table, &FieldComparisonPolicy::registry(false));
        assert_eq!(outcome.stats.added, 1);
        assert_eq!(outcome.stats.deleted, 0);
        assert_eq!(outcome.records[0].path, "HKCU\\Software\\Classes\\.zip");
    }

    #[test]
    fn test_differing_malformed_timestamps_are_changes() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("before.csv");
        let after = dir.path().join("after.csv");
        fs::write(&before, format!("{}C:\\a.txt,1,,01/02/2019 10:00,,h,,\n", FILE_HEADER)).unwrap();
        fs::write(&after, format!("{}C:\\a.txt,1,,01/03/2019 10:00,,h,,\n", FILE_HEADER)).unwrap();

        let fingerprint = Fingerprint::builder().build().unwrap();
        let output = dir.path().join("diff.csv");
        let stats = fingerprint.diff_files(&before, &after, &output).unwrap();
        assert_eq!(stats.changed, 1);

        let written = fs::read_to_string(&output).unwrap();
        assert!(written.contains("CHANGED"));
        assert!(written.contains("01/03/2019 10:00"), "Unexpected diff: {}", written);

        // A malformed cell equal on both sides is not a change
        let stats = fingerprint.diff_files(&before, &before, &output).unwrap();
        assert!(!stats.has_changes());

        let table = load_file_snapshot(&before).unwrap();
        let record = table.get(&"C:\\a.txt".to_string()).unwrap();
        assert_eq!(record.modified, None);
        assert_eq!(record.unparsed.modified.as_deref(), Some("01/02/2019 10:00"));
    }

    #[test]
    fn test_unicode_and_quoted_paths_survive() {
        let dir = TempDir::new().unwrap();
        let mut files = FileSnapshot::new();
        for path in ["C:\\Users\\Zoë\\файл.txt", "C:\\weird, \"quoted\" name.txt", "C:\\日本語"] {
            files.insert(path.to_string(), FileRecord::new(path));
        }
        let path = dir.path().join("unicode.csv");
        snapshot::write_file_snapshot(&path, &files).unwrap();

        let loaded = load_file_snapshot(&path).unwrap();
        assert_eq!(loaded.records(), files.records());
    }

    #[test]
    fn test_ragged_rows_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "path,size,created\nC:\\a\nC:\\b,3,2020-01-01 00:00:00,extra,columns\n").unwrap();
        let loaded = load_file_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(&"C:\\b".to_string()).unwrap().size, Some(3));
    }
}
