//! Keyed record tables
//!
//! A snapshot is loaded into a [`RecordTable`]: the records in file order
//! plus an index from record identity to position. The index has two tiers.
//! Canonical keys come from the records themselves; alias keys are extra
//! names for the same record (see [`crate::aliasing`]). Lookups try the
//! canonical tier first, so a real record always shadows an alias that
//! happens to spell the same key.

use crate::collections::{HashMap, HashMapExt};
use std::hash::Hash;

/// Two-tier index from keys to record positions
#[derive(Debug, Clone)]
pub struct KeyIndex<K> {
    canonical: HashMap<K, usize>,
    aliases: HashMap<K, usize>,
}

impl<K: Eq + Hash> KeyIndex<K> {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            canonical: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Create an index sized for `capacity` canonical keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            canonical: HashMap::with_capacity(capacity),
            aliases: HashMap::new(),
        }
    }

    /// Register a canonical key; the first registration of a key wins
    pub fn insert_canonical(&mut self, key: K, position: usize) -> bool {
        if self.canonical.contains_key(&key) {
            return false;
        }
        self.canonical.insert(key, position);
        true
    }

    /// Register an alias key
    ///
    /// Ignored when the key is already known in either tier.
    pub fn insert_alias(&mut self, key: K, position: usize) -> bool {
        if self.canonical.contains_key(&key) || self.aliases.contains_key(&key) {
            return false;
        }
        self.aliases.insert(key, position);
        true
    }

    /// Position of the record known under `key`
    pub fn lookup(&self, key: &K) -> Option<usize> {
        self.canonical
            .get(key)
            .or_else(|| self.aliases.get(key))
            .copied()
    }

    /// Position registered under `key` in the canonical tier only
    pub fn canonical(&self, key: &K) -> Option<usize> {
        self.canonical.get(key).copied()
    }

    /// Position registered under `key` in the alias tier only
    pub fn alias(&self, key: &K) -> Option<usize> {
        self.aliases.get(key).copied()
    }

    /// Whether `key` resolves to a record
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of canonical keys
    pub fn canonical_len(&self) -> usize {
        self.canonical.len()
    }

    /// Number of alias keys
    pub fn alias_len(&self) -> usize {
        self.aliases.len()
    }
}

impl<K: Eq + Hash> Default for KeyIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Records in load order, addressable by key
#[derive(Debug, Clone)]
pub struct RecordTable<K, R> {
    records: Vec<R>,
    index: KeyIndex<K>,
}

impl<K: Eq + Hash, R> RecordTable<K, R> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: KeyIndex::new(),
        }
    }

    /// Append a record under its canonical key
    ///
    /// Returns `false` and drops the record when the key is already present;
    /// the first occurrence stays authoritative.
    pub fn insert(&mut self, key: K, record: R) -> bool {
        let position = self.records.len();
        if !self.index.insert_canonical(key, position) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Make the record at `position` reachable under `alias` as well
    pub fn insert_alias(&mut self, alias: K, position: usize) -> bool {
        if position >= self.records.len() {
            return false;
        }
        self.index.insert_alias(alias, position)
    }

    /// Record known under `key`
    pub fn get(&self, key: &K) -> Option<&R> {
        self.index.lookup(key).map(|position| &self.records[position])
    }

    /// Position of the record known under `key`
    pub fn position(&self, key: &K) -> Option<usize> {
        self.index.lookup(key)
    }

    /// Position of the record whose own key is `key`
    pub fn canonical_position(&self, key: &K) -> Option<usize> {
        self.index.canonical(key)
    }

    /// Position of the record reachable under the alias `key`
    pub fn alias_position(&self, key: &K) -> Option<usize> {
        self.index.alias(key)
    }

    /// Whether `key` resolves to a record
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains(key)
    }

    /// Record at `position`
    pub fn record(&self, position: usize) -> Option<&R> {
        self.records.get(position)
    }

    /// Records in load order
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    /// Records in load order
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of alias keys
    pub fn alias_count(&self) -> usize {
        self.index.alias_len()
    }

    /// Consume the table, keeping the records
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

impl<K: Eq + Hash, R> Default for RecordTable<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K: Eq + Hash, R> IntoIterator for &'a RecordTable<K, R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
