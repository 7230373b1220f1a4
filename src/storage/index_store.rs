//! Index store implementation
//!
//! Ordered mapping from index key to the set of primary keys carrying it.
//! Entries sort by index key, then primary key.

use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::key::{is_empty_interval, max_lower, min_upper, Key, KeyRange};

/// Lazy iterator over `(index key, primary key)` entries
pub type Entries<'a> = Box<dyn DoubleEndedIterator<Item = (&'a Key, &'a Key)> + 'a>;

/// Secondary records of one index
#[derive(Debug, Clone, Default)]
pub struct IndexStore {
    entries: BTreeMap<Key, BTreeSet<Key>>,
    len: usize,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `(index key, primary key)` entry
    pub fn insert(&mut self, index_key: Key, primary_key: Key) {
        if self.entries.entry(index_key).or_default().insert(primary_key) {
            self.len += 1;
        }
    }

    /// Remove an `(index key, primary key)` entry
    pub fn remove(&mut self, index_key: &Key, primary_key: &Key) {
        let Some(primary_keys) = self.entries.get_mut(index_key) else {
            return;
        };
        if primary_keys.remove(primary_key) {
            self.len -= 1;
        }
        if primary_keys.is_empty() {
            self.entries.remove(index_key);
        }
    }

    /// Primary keys stored under `index_key`
    pub fn primary_keys(&self, index_key: &Key) -> Option<&BTreeSet<Key>> {
        self.entries.get(index_key)
    }

    /// Whether `index_key` is held by a record other than `primary_key`
    pub fn is_taken_by_other(&self, index_key: &Key, primary_key: &Key) -> bool {
        self.entries
            .get(index_key)
            .is_some_and(|pks| pks.iter().any(|pk| pk != primary_key))
    }

    /// Entries inside `range`, ascending; reverse for descending order
    pub fn range<'a>(&'a self, range: &'a KeyRange) -> Entries<'a> {
        self.range_within(range, Bound::Unbounded, Bound::Unbounded)
    }

    /// Entries whose index key lies inside both `range` and the extra bounds
    pub fn range_within<'a>(
        &'a self,
        range: &'a KeyRange,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
    ) -> Entries<'a> {
        match self.groups_within(range, lower, upper) {
            None => Box::new(std::iter::empty()),
            Some(groups) => Box::new(
                groups.flat_map(|(index_key, pks)| pks.iter().map(move |pk| (index_key, pk))),
            ),
        }
    }

    /// Distinct index keys inside the bounds, with their primary keys
    pub fn groups_within<'a>(
        &'a self,
        range: &'a KeyRange,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
    ) -> Option<btree_map::Range<'a, Key, BTreeSet<Key>>> {
        let lower = max_lower(range.lower_bound_ref(), lower);
        let upper = min_upper(range.upper_bound_ref(), upper);
        if is_empty_interval(lower, upper) {
            return None;
        }
        Some(self.entries.range::<Key, _>((lower, upper)))
    }

    /// Number of entries inside `range`
    pub fn count(&self, range: &KeyRange) -> usize {
        if range.is_unbounded() {
            return self.len;
        }
        self.groups_within(range, Bound::Unbounded, Bound::Unbounded)
            .map(|groups| groups.map(|(_, pks)| pks.len()).sum())
            .unwrap_or(0)
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}
