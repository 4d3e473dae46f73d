//! Snapshot reconciliation
//!
//! This module computes the delta between two loaded snapshots. The same
//! algorithm serves file and registry snapshots through the [`Diffable`]
//! trait; what counts as a change, and how loud that change is, comes from a
//! [`FieldComparisonPolicy`].
//!
//! ## Algorithm
//!
//! 1. Match every later record whose key is a canonical key of the earlier
//!    snapshot, consuming that earlier record.
//! 2. Match the remaining later records through the alias tier of the earlier
//!    table, against earlier records not yet consumed. A registry row
//!    captured under `HKU\<sid>` thereby matches the same row captured under
//!    `HKCU`, but never steals a record still present under its own key.
//! 3. Walk the later snapshot in load order. An unmatched record is `ADDED`.
//!    A matched one has its compared fields checked against the earlier record:
//!    - a difference in any *loud* field gives `CHANGED`
//!    - otherwise a difference in any *silent* field gives `CHANGED_SILENT`
//!    - no difference means the record is not reported
//! 4. Every earlier record never consumed is `DELETED`, in load order.
//!
//! An earlier record is consumed at most once, so the outcome does not depend
//! on the row order of either snapshot.
//!
//! ## Examples
//!
//! ```rust
//! use winfingerprint::diff::{diff, FieldComparisonPolicy};
//! use winfingerprint::table::RecordTable;
//! use winfingerprint::types::{ChangeKind, FileRecord};
//!
//! let mut before = RecordTable::new();
//! let mut old = FileRecord::new("a.txt");
//! old.size = Some(10);
//! before.insert(old.path.clone(), old);
//!
//! let mut after = RecordTable::new();
//! let mut new = FileRecord::new("a.txt");
//! new.size = Some(20);
//! after.insert(new.path.clone(), new);
//!
//! let outcome = diff(&before, &after, &FieldComparisonPolicy::files());
//! assert_eq!(outcome.records[0].change, ChangeKind::ChangedSilent);
//! assert_eq!(outcome.records[0].remark, "Size changed from 10 to 20");
//! ```

use crate::table::RecordTable;
use crate::types::{ChangeKind, DiffStats, FileRecord, RegistryKey, RegistryRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::hash::Hash;
use tracing::{debug, info, trace};

/// A field that can take part in record comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    /// File size
    Size,
    /// File creation time
    Created,
    /// File modification time or registry key last write time
    Modified,
    /// File access time
    Accessed,
    /// File content hash
    Hash,
    /// File remark (e.g. "access denied")
    Remark,
    /// Registry value type
    ValueType,
    /// Registry value data
    Value,
}

/// How a difference in a field is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Difference classifies the record as `CHANGED`
    Loud,
    /// Difference classifies as `CHANGED_SILENT` unless a loud field also differs
    Silent,
    /// Field does not take part in comparison
    Ignored,
}

/// Which fields are compared, and how loudly they report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldComparisonPolicy {
    roles: BTreeMap<RecordField, FieldRole>,
}

impl FieldComparisonPolicy {
    /// Policy with every field ignored
    pub fn empty() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }

    /// Default file policy
    ///
    /// Timestamps (and the remark) are loud; size and hash are silent, since
    /// a content change that left the timestamps alone is the interesting case;
    /// the access time is ignored.
    pub fn files() -> Self {
        Self::empty()
            .with_role(RecordField::Created, FieldRole::Loud)
            .with_role(RecordField::Modified, FieldRole::Loud)
            .with_role(RecordField::Remark, FieldRole::Loud)
            .with_role(RecordField::Size, FieldRole::Silent)
            .with_role(RecordField::Hash, FieldRole::Silent)
    }

    /// Registry policy
    ///
    /// Key last write times churn constantly, so they only count when
    /// `check_modified` is set.
    pub fn registry(check_modified: bool) -> Self {
        let modified = if check_modified { FieldRole::Loud } else { FieldRole::Ignored };
        Self::empty()
            .with_role(RecordField::ValueType, FieldRole::Loud)
            .with_role(RecordField::Value, FieldRole::Loud)
            .with_role(RecordField::Modified, modified)
    }

    /// Set the role of one field
    pub fn with_role(mut self, field: RecordField, role: FieldRole) -> Self {
        if role == FieldRole::Ignored {
            self.roles.remove(&field);
        } else {
            self.roles.insert(field, role);
        }
        self
    }

    /// Role of a field; unlisted fields are ignored
    pub fn role(&self, field: RecordField) -> FieldRole {
        self.roles.get(&field).copied().unwrap_or(FieldRole::Ignored)
    }

    /// Whether a field takes part in comparison
    pub fn compares(&self, field: RecordField) -> bool {
        self.role(field) != FieldRole::Ignored
    }

    /// Classify a set of field differences
    pub fn classify(&self, changes: &[FieldChange]) -> Option<ChangeKind> {
        let roles = changes.iter().map(|change| self.role(change.field));
        let mut silent = false;
        for role in roles {
            match role {
                FieldRole::Loud => return Some(ChangeKind::Changed),
                FieldRole::Silent => silent = true,
                FieldRole::Ignored => {}
            }
        }
        silent.then_some(ChangeKind::ChangedSilent)
    }
}

impl Default for FieldComparisonPolicy {
    fn default() -> Self {
        Self::files()
    }
}

/// One differing field with its human readable clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// The field that differs
    pub field: RecordField,
    /// Description, e.g. `Size changed from 10 to 20`
    pub clause: String,
}

/// A record type the diff engine can reconcile
pub trait Diffable: Clone {
    /// Identity of a record within one snapshot
    type Key: Eq + Hash;

    /// Identity of this record
    fn key(&self) -> Self::Key;

    /// Differences from `before` in the fields `policy` compares
    fn field_changes(&self, before: &Self, policy: &FieldComparisonPolicy) -> Vec<FieldChange>;

    /// Attach the classification (and, for changes, the details) to a copy
    fn annotate(&mut self, kind: ChangeKind, before: Option<&Self>, changes: &[FieldChange]);
}

/// Classified records plus their counts
#[derive(Debug, Clone)]
pub struct DiffOutcome<R> {
    /// Added and changed records in later-snapshot order, then deleted ones
    pub records: Vec<R>,
    /// Per-kind counts
    pub stats: DiffStats,
}

/// Reconcile two snapshots
///
/// Pure function of its inputs: the tables are not modified and every
/// reported record is a fresh copy carrying its classification.
pub fn diff<R: Diffable>(
    before: &RecordTable<R::Key, R>,
    after: &RecordTable<R::Key, R>,
    policy: &FieldComparisonPolicy,
) -> DiffOutcome<R> {
    let mut consumed = vec![false; before.len()];
    let mut matches: Vec<Option<usize>> = after
        .iter()
        .map(|record| {
            let position = before.canonical_position(&record.key());
            if let Some(position) = position {
                consumed[position] = true;
            }
            position
        })
        .collect();

    for (slot, record) in matches.iter_mut().zip(after) {
        if slot.is_some() {
            continue;
        }
        let aliased = before
            .alias_position(&record.key())
            .filter(|&position| !consumed[position]);
        if let Some(position) = aliased {
            consumed[position] = true;
            *slot = Some(position);
        }
    }

    let mut records = Vec::new();
    let mut stats = DiffStats::default();
    for (record, matched) in after.iter().zip(matches) {
        let Some(position) = matched else {
            let mut added = record.clone();
            added.annotate(ChangeKind::Added, None, &[]);
            stats.record(ChangeKind::Added);
            records.push(added);
            continue;
        };

        let Some(prior) = before.record(position) else {
            continue;
        };
        let changes = record.field_changes(prior, policy);
        if let Some(kind) = policy.classify(&changes) {
            let mut changed = record.clone();
            changed.annotate(kind, Some(prior), &changes);
            stats.record(kind);
            records.push(changed);
        } else if !changes.is_empty() {
            trace!("{} differences ignored by policy", changes.len());
        }
    }

    for (position, prior) in before.iter().enumerate() {
        if consumed[position] {
            continue;
        }
        let mut deleted = prior.clone();
        deleted.annotate(ChangeKind::Deleted, None, &[]);
        stats.record(ChangeKind::Deleted);
        records.push(deleted);
    }

    info!(
        "Diff complete: {} added, {} deleted, {} changed, {} changed silently",
        stats.added, stats.deleted, stats.changed, stats.changed_silent
    );
    DiffOutcome { records, stats }
}

/// A typed metadata value with the text kept when its cell did not parse
type Cell<'a, T> = (Option<T>, &'a Option<String>);

fn shown<T: Display>((value, text): Cell<'_, T>) -> String {
    match (value, text) {
        (Some(value), _) => value.to_string(),
        (None, Some(text)) => text.clone(),
        (None, None) => "unknown".to_string(),
    }
}

fn compare_cell<T: Display + PartialEq + Copy>(
    changes: &mut Vec<FieldChange>,
    policy: &FieldComparisonPolicy,
    field: RecordField,
    name: &str,
    old: Cell<'_, T>,
    new: Cell<'_, T>,
) {
    if policy.compares(field) && old != new {
        changes.push(FieldChange {
            field,
            clause: format!("{} changed from {} to {}", name, shown(old), shown(new)),
        });
    }
}

impl Diffable for FileRecord {
    type Key = String;

    fn key(&self) -> String {
        self.path.clone()
    }

    fn field_changes(&self, before: &Self, policy: &FieldComparisonPolicy) -> Vec<FieldChange> {
        let (old, new) = (&before.unparsed, &self.unparsed);
        let mut changes = Vec::new();
        compare_cell(
            &mut changes,
            policy,
            RecordField::Size,
            "Size",
            (before.size, &old.size),
            (self.size, &new.size),
        );
        compare_cell(
            &mut changes,
            policy,
            RecordField::Created,
            "created",
            (before.created, &old.created),
            (self.created, &new.created),
        );
        compare_cell(
            &mut changes,
            policy,
            RecordField::Modified,
            "modified",
            (before.modified, &old.modified),
            (self.modified, &new.modified),
        );
        compare_cell(
            &mut changes,
            policy,
            RecordField::Accessed,
            "accessed",
            (before.accessed, &old.accessed),
            (self.accessed, &new.accessed),
        );
        if policy.compares(RecordField::Hash) && before.hash != self.hash {
            changes.push(FieldChange {
                field: RecordField::Hash,
                clause: "hash (data) changed".to_string(),
            });
        }
        if policy.compares(RecordField::Remark) && before.remark != self.remark {
            changes.push(FieldChange {
                field: RecordField::Remark,
                clause: format!("remark changed from '{}' to '{}'", before.remark, self.remark),
            });
        }
        changes
    }

    fn annotate(&mut self, kind: ChangeKind, _before: Option<&Self>, changes: &[FieldChange]) {
        self.change = kind;
        if !changes.is_empty() {
            self.remark = changes
                .iter()
                .map(|change| change.clause.as_str())
                .collect::<Vec<_>>()
                .join(", ");
        }
    }
}

impl Diffable for RegistryRow {
    type Key = RegistryKey;

    fn key(&self) -> RegistryKey {
        RegistryRow::key(self)
    }

    fn field_changes(&self, before: &Self, policy: &FieldComparisonPolicy) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        compare_cell(
            &mut changes,
            policy,
            RecordField::Modified,
            "modified",
            (before.modified, &before.unparsed.modified),
            (self.modified, &self.unparsed.modified),
        );
        if policy.compares(RecordField::ValueType) && before.value_type != self.value_type {
            changes.push(FieldChange {
                field: RecordField::ValueType,
                clause: format!("value_type changed from {} to {}", before.value_type, self.value_type),
            });
        }
        if policy.compares(RecordField::Value) && before.value != self.value {
            changes.push(FieldChange {
                field: RecordField::Value,
                clause: "value changed".to_string(),
            });
        }
        changes
    }

    fn annotate(&mut self, kind: ChangeKind, before: Option<&Self>, changes: &[FieldChange]) {
        self.change = kind;
        let value_changed = changes.iter().any(|change| change.field == RecordField::Value);
        if let (true, Some(before)) = (value_changed, before) {
            self.value_old = before.value.clone();
        }
        if !changes.is_empty() {
            debug!(
                "{}\\{}: {}",
                self.path,
                self.value_name,
                changes
                    .iter()
                    .map(|change| change.clause.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}
