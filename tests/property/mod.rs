//! Property-based testing for winfingerprint
//!
//! Uses proptest to check the diff, aliasing and correlation invariants over
//! randomly generated snapshots.

use ::winfingerprint::aliasing::{apply_registry_aliases, registry_aliases};
use ::winfingerprint::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Generate a Windows file path
fn file_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z]{1,6}", 0..=3),
        prop_oneof!["[a-z]{1,8}\\.(txt|dll|exe)", "[A-Z][a-z]{2,6}"],
    )
        .prop_map(|(dirs, name)| {
            let mut path = String::from("C:");
            for dir in dirs {
                path.push('\\');
                path.push_str(&dir);
            }
            path.push('\\');
            path.push_str(&name);
            path
        })
}

/// Generate a file record with small value ranges so snapshots collide often
fn file_record_strategy() -> impl Strategy<Value = FileRecord> {
    (
        file_path_strategy(),
        prop::option::of(0u64..4),
        prop::option::of(0i64..3),
        prop::option::of(0i64..3),
        prop::option::of(0i64..3),
        "[ab]",
        prop_oneof![Just(String::new()), Just("access denied".to_string())],
    )
        .prop_map(|(path, size, created, modified, accessed, hash, remark)| FileRecord {
            path,
            size,
            created: created.map(|s| Timestamp::from_epoch_seconds(s as f64)),
            modified: modified.map(|s| Timestamp::from_epoch_seconds(s as f64)),
            accessed: accessed.map(|s| Timestamp::from_epoch_seconds(s as f64)),
            hash,
            change: ChangeKind::Unset,
            remark,
            ..Default::default()
        })
}

fn file_snapshot_strategy() -> impl Strategy<Value = FileSnapshot> {
    prop::collection::vec(file_record_strategy(), 0..40).prop_map(|records| {
        let mut table = FileSnapshot::new();
        for record in records {
            table.insert(record.path.clone(), record);
        }
        table
    })
}

/// Generate a registry key path under one of the aliased or plain roots
fn registry_path_strategy() -> impl Strategy<Value = String> {
    let root = prop_oneof![
        Just("HKLM\\SOFTWARE".to_string()),
        Just("HKCR".to_string()),
        Just("HKCU\\Software\\Classes".to_string()),
        Just("HKCU".to_string()),
        Just("HKU\\.DEFAULT".to_string()),
        Just("HKU\\S-1-5-21-1".to_string()),
        Just("HKU\\S-1-5-21-1_Classes".to_string()),
    ];
    (root, prop::collection::vec("[a-c]{1,2}", 0..=2)).prop_map(|(root, segments)| {
        let mut path = root;
        for segment in segments {
            path.push('\\');
            path.push_str(&segment);
        }
        path
    })
}

fn registry_row_strategy() -> impl Strategy<Value = RegistryRow> {
    (
        registry_path_strategy(),
        prop_oneof![Just(String::new()), Just("v".to_string()), Just(DEFAULT_VALUE_NAME.to_string())],
        "[xy]",
        prop::option::of(0i64..2),
    )
        .prop_map(|(path, value_name, value, modified)| {
            let modified = modified.map(|s| Timestamp::from_epoch_seconds(s as f64));
            if value_name.is_empty() {
                RegistryRow::key_row(&path, modified)
            } else {
                RegistryRow {
                    path,
                    modified,
                    value_name,
                    value_type: RegistryValueType::String,
                    value,
                    ..Default::default()
                }
            }
        })
}

fn registry_snapshot_strategy() -> impl Strategy<Value = RegistrySnapshot> {
    prop::collection::vec(registry_row_strategy(), 0..30).prop_map(registry_table)
}

fn registry_table(rows: Vec<RegistryRow>) -> RegistrySnapshot {
    let mut table = RegistrySnapshot::new();
    for row in rows {
        table.insert(row.key(), row);
    }
    apply_registry_aliases(&mut table);
    table
}

fn change_set(rows: &[RegistryRow]) -> BTreeSet<(RegistryKey, &'static str)> {
    rows.iter().map(|row| (row.key(), row.change.as_str())).collect()
}

fn count(records: &[FileRecord], kind: ChangeKind) -> usize {
    records.iter().filter(|r| r.change == kind).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a snapshot diffed against itself yields nothing
    #[test]
    fn diff_with_self_is_empty(files in file_snapshot_strategy(), registry in registry_snapshot_strategy()) {
        let outcome = diff(&files, &files, &FieldComparisonPolicy::files());
        prop_assert!(outcome.records.is_empty());
        prop_assert!(!outcome.stats.has_changes());

        let outcome = diff(&registry, &registry, &FieldComparisonPolicy::registry(true));
        prop_assert!(outcome.records.is_empty(), "{:?}", outcome.records);
    }

    /// Property: every record of either side is accounted for exactly once
    #[test]
    fn diff_partitions_both_snapshots(before in file_snapshot_strategy(), after in file_snapshot_strategy()) {
        let outcome = diff(&before, &after, &FieldComparisonPolicy::files());

        let added = count(&outcome.records, ChangeKind::Added);
        let deleted = count(&outcome.records, ChangeKind::Deleted);
        let changed = count(&outcome.records, ChangeKind::Changed);
        let silent = count(&outcome.records, ChangeKind::ChangedSilent);
        prop_assert_eq!(added, outcome.stats.added);
        prop_assert_eq!(deleted, outcome.stats.deleted);
        prop_assert_eq!(changed, outcome.stats.changed);
        prop_assert_eq!(silent, outcome.stats.changed_silent);
        prop_assert_eq!(outcome.records.len(), outcome.stats.total());

        // Files have no aliases: matched = |after| - added = |before| - deleted
        prop_assert_eq!(after.len() - added, before.len() - deleted);
        let unchanged = after.len() - added - changed - silent;
        prop_assert_eq!(unchanged + changed + silent + deleted, before.len());
    }

    /// Property: a record carries exactly one classification
    #[test]
    fn classifications_are_exclusive(before in file_snapshot_strategy(), after in file_snapshot_strategy()) {
        let outcome = diff(&before, &after, &FieldComparisonPolicy::files());
        let mut seen = BTreeSet::new();
        for record in &outcome.records {
            prop_assert_ne!(record.change, ChangeKind::Unset);
            // Without aliases a path cannot be both deleted and added
            prop_assert!(seen.insert(record.path.clone()), "{} reported twice", record.path);
        }
        for record in &outcome.records {
            match record.change {
                ChangeKind::Added => {
                    prop_assert!(!before.contains_key(&record.path));
                }
                ChangeKind::Deleted => {
                    prop_assert!(!after.contains_key(&record.path));
                }
                _ => {
                    prop_assert!(before.contains_key(&record.path));
                    prop_assert!(after.contains_key(&record.path));
                }
            }
        }
    }

    /// Property: the registry diff never reports more than both sides hold
    #[test]
    fn registry_diff_is_bounded(before in registry_snapshot_strategy(), after in registry_snapshot_strategy()) {
        let outcome = diff(&before, &after, &FieldComparisonPolicy::registry(false));
        prop_assert!(outcome.stats.added + outcome.stats.changed <= after.len());
        prop_assert!(outcome.stats.deleted <= before.len());
        prop_assert_eq!(outcome.stats.changed_silent, 0);
    }

    /// Property: the registry diff does not depend on the later snapshot's row order
    #[test]
    fn registry_diff_ignores_row_order(
        before in registry_snapshot_strategy(),
        (rows, shuffled) in registry_snapshot_strategy().prop_flat_map(|table| {
            let rows = table.into_records();
            (Just(rows.clone()), Just(rows).prop_shuffle())
        }),
        check_modified in any::<bool>(),
    ) {
        let policy = FieldComparisonPolicy::registry(check_modified);
        let outcome = diff(&before, &registry_table(rows), &policy);
        let reordered = diff(&before, &registry_table(shuffled), &policy);
        prop_assert_eq!(change_set(&outcome.records), change_set(&reordered.records));
        prop_assert_eq!(outcome.stats, reordered.stats);
    }

    /// Property: aliases are stable and never point back at the path itself
    #[test]
    fn aliasing_is_idempotent(path in registry_path_strategy()) {
        let aliases = registry_aliases(&path);
        prop_assert!(aliases.len() <= 1);
        for alias in &aliases {
            prop_assert_ne!(alias, &path);
            prop_assert!(alias.starts_with("HKCU"));
            // An alias is already in its final spelling
            prop_assert!(registry_aliases(alias).is_empty());
        }
        prop_assert_eq!(registry_aliases(&path), aliases);
    }

    /// Property: applying aliases twice adds nothing the second time
    #[test]
    fn apply_aliases_twice_is_noop(mut table in registry_snapshot_strategy()) {
        let len = table.len();
        prop_assert_eq!(apply_registry_aliases(&mut table), 0);
        prop_assert_eq!(table.len(), len);
    }

    /// Property: correlation only ever narrows its inputs
    #[test]
    fn correlation_is_a_subset(
        files in file_snapshot_strategy(),
        registry in registry_snapshot_strategy(),
        accessed in prop::collection::vec(prop_oneof![file_path_strategy(), registry_path_strategy()], 0..30),
    ) {
        let events: Vec<ProcmonEvent> = accessed
            .iter()
            .map(|path| ProcmonEvent::from_pairs([("Operation", "Access"), ("Path", path.as_str())]))
            .collect();
        let log = ProcmonLog::from_events(events);
        let result = correlate(&log, &files, &registry);

        prop_assert!(result.events.len() <= log.len());
        prop_assert!(result.files.len() <= files.len());
        prop_assert!(result.registry.len() <= registry.len());
        for record in &result.files {
            prop_assert!(files.records().contains(record));
            prop_assert!(accessed.contains(&record.path));
        }
        for row in &result.registry {
            prop_assert!(registry.records().contains(row));
        }
        let mut kept = BTreeSet::new();
        for record in &result.files {
            prop_assert!(kept.insert(record.path.clone()));
        }
    }
}
