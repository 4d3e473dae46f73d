//! Hash map and set aliases used by the lookup tables.
//!
//! With the `gxhash` feature the tables hash with gxhash, which needs AES-NI
//! and SSE2 at build time; without it they fall back to the std collections.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap as GxHashMap, HashMapExt, HashSet as GxHashSet, HashSetExt};

#[cfg(not(feature = "gxhash"))]
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

/// Map type behind every snapshot lookup table
#[cfg(feature = "gxhash")]
pub type HashMap<K, V> = GxHashMap<K, V>;

/// Map type behind every snapshot lookup table
#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = StdHashMap<K, V>;

/// Set type for accessed-path collections
#[cfg(feature = "gxhash")]
pub type HashSet<T> = GxHashSet<T>;

/// Set type for accessed-path collections
#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = StdHashSet<T>;

/// Constructors shared by both map flavours
#[cfg(not(feature = "gxhash"))]
pub trait HashMapExt {
    /// Creates an empty map
    fn new() -> Self;

    /// Creates an empty map able to hold `capacity` entries
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<K, V> HashMapExt for StdHashMap<K, V> {
    fn new() -> Self {
        StdHashMap::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        StdHashMap::with_capacity(capacity)
    }
}

/// Constructors shared by both set flavours
#[cfg(not(feature = "gxhash"))]
pub trait HashSetExt {
    /// Creates an empty set
    fn new() -> Self;

    /// Creates an empty set able to hold `capacity` entries
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<T> HashSetExt for StdHashSet<T> {
    fn new() -> Self {
        StdHashSet::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        StdHashSet::with_capacity(capacity)
    }
}
