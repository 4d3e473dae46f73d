//! Registry path aliasing
//!
//! The same registry key is reachable under several root names. `HKCR` is a
//! merged view whose per-user half lives in `HKCU\Software\Classes`, and every
//! `HKU\<sid>` hive is `HKCU` for the user it belongs to. Snapshots store the
//! path under which a hive was exported, while a process monitor reports the
//! path the process actually used, so both sides have to agree on the
//! alternate spellings.
//!
//! Rules, applied to the key path of a registry row:
//!
//! | Path                                         | Alias                               |
//! |----------------------------------------------|-------------------------------------|
//! | `HKCR\...\<x>_Classes<rest>`                 | `HKCU\Software\Classes<rest>`       |
//! | `HKCR<rest>` (no `_Classes` segment)         | `HKCU\Software\Classes<rest>`       |
//! | `HKU\.DEFAULT\<rest>`                        | `HKCU\<rest>`                       |
//! | `HKU\<sid>_Classes\<sid>_Classes\<rest>`     | `HKCU\Software\Classes\<rest>`      |
//! | `HKU\<sid>_Classes\<rest>`                   | `HKCU\Software\Classes\<rest>`      |
//! | `HKU\<sid>\<rest>`                           | `HKCU\<rest>`                       |
//!
//! A bare `HKU\<sid>` has no alias. Aliases never replace a canonical key;
//! see [`crate::table::KeyIndex`].

use crate::table::{KeyIndex, RecordTable};
use crate::types::{RegistryKey, RegistryRow};
use tracing::debug;

const CLASSES_ROOT: &str = "HKCU\\Software\\Classes";
const CLASSES_MARKER: &str = "_Classes";

/// Alternate spellings of a registry key path
///
/// # Examples
///
/// ```rust
/// use winfingerprint::aliasing::registry_aliases;
///
/// assert_eq!(
///     registry_aliases("HKU\\S-1-5-21-1\\Software\\X"),
///     vec!["HKCU\\Software\\X".to_string()]
/// );
/// assert!(registry_aliases("HKLM\\SOFTWARE").is_empty());
/// ```
pub fn registry_aliases(path: &str) -> Vec<String> {
    let alias = if is_under(path, "HKCR") {
        classes_root_alias(path)
    } else if is_under(path, "HKU") {
        users_alias(path)
    } else {
        None
    };
    alias.into_iter().filter(|candidate| candidate != path).collect()
}

/// Register every alias of every row of a registry snapshot
///
/// Rows are identified by `(path, value_name)`; an alias keeps the value name
/// and swaps the key path. Returns the number of aliases added.
pub fn apply_registry_aliases(table: &mut RecordTable<RegistryKey, RegistryRow>) -> usize {
    let pending: Vec<(RegistryKey, usize)> = table
        .iter()
        .enumerate()
        .flat_map(|(position, row)| {
            registry_aliases(&row.path)
                .into_iter()
                .map(move |alias| (RegistryKey::new(alias, row.value_name.clone()), position))
        })
        .collect();

    let mut added = 0;
    for (alias, position) in pending {
        if table.insert_alias(alias, position) {
            added += 1;
        }
    }
    debug!("Registered {} registry aliases over {} rows", added, table.len());
    added
}

/// Index a registry snapshot by the path a process monitor would report
///
/// Canonical access paths go in first so they win over any alias of a
/// different row that spells the same path.
pub fn access_path_index(table: &RecordTable<RegistryKey, RegistryRow>) -> KeyIndex<String> {
    let mut index = KeyIndex::with_capacity(table.len());
    for (position, row) in table.iter().enumerate() {
        index.insert_canonical(row.access_path(), position);
    }
    for (position, row) in table.iter().enumerate() {
        for alias in registry_aliases(&row.access_path()) {
            index.insert_alias(alias, position);
        }
    }
    index
}

fn is_under(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('\\'))
}

fn classes_path(rest: &str) -> String {
    let rest = rest.trim_matches('\\');
    if rest.is_empty() {
        CLASSES_ROOT.to_string()
    } else {
        format!("{}\\{}", CLASSES_ROOT, rest)
    }
}

fn classes_root_alias(path: &str) -> Option<String> {
    let rest = match path.find(CLASSES_MARKER) {
        Some(at) => &path[at + CLASSES_MARKER.len()..],
        None => &path["HKCR".len()..],
    };
    Some(classes_path(rest))
}

fn users_alias(path: &str) -> Option<String> {
    let below_root = path["HKU".len()..].trim_start_matches('\\');
    let (hive, rest) = below_root.split_once('\\').unwrap_or((below_root, ""));
    let rest = rest.trim_matches('\\');

    if hive == ".DEFAULT" {
        return (!rest.is_empty()).then(|| format!("HKCU\\{}", rest));
    }
    if hive.is_empty() || rest.is_empty() {
        return None;
    }
    if hive.ends_with(CLASSES_MARKER) {
        // Exported class hives repeat their root name as the first key segment.
        let rest = match rest.split_once('\\') {
            Some((first, tail)) if first.ends_with(CLASSES_MARKER) => tail,
            None if rest.ends_with(CLASSES_MARKER) => "",
            _ => rest,
        };
        return Some(classes_path(rest));
    }
    Some(format!("HKCU\\{}", rest))
}
