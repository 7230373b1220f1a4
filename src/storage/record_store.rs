//! Record store implementation
//!
//! BTreeMap-based ordered table of `(primary key, value)` records.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::key::{is_empty_interval, max_lower, min_upper, Key, KeyRange};
use crate::value::Value;

/// Ordered records of one object store
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<Key, Value>,
}

impl RecordStore {
    /// Create a new empty RecordStore
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records.contains_key(key)
    }

    /// Insert a record, returning the value it replaced
    pub fn insert_or_replace(&mut self, key: Key, value: Value) -> Option<Value> {
        self.records.insert(key, value)
    }

    /// Delete a record, returning its value
    pub fn delete(&mut self, key: &Key) -> Option<Value> {
        self.records.remove(key)
    }

    /// Delete every record in `range`, returning what was removed
    pub fn delete_range(&mut self, range: &KeyRange) -> Vec<(Key, Value)> {
        let doomed: Vec<Key> = self.range(range).map(|(k, _)| k.clone()).collect();
        doomed
            .into_iter()
            .filter_map(|key| self.records.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Records inside `range`, ascending; reverse for descending order.
    ///
    /// The iterator borrows the store, so restarting a scan is a matter
    /// of calling this again.
    pub fn range<'a>(&'a self, range: &'a KeyRange) -> Records<'a> {
        self.range_within(range, Bound::Unbounded, Bound::Unbounded)
    }

    /// Records inside both `range` and the extra bounds
    pub fn range_within<'a>(
        &'a self,
        range: &'a KeyRange,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
    ) -> Records<'a> {
        let lower = max_lower(range.lower_bound_ref(), lower);
        let upper = min_upper(range.upper_bound_ref(), upper);
        if is_empty_interval(lower, upper) {
            return Records { inner: None };
        }
        Records {
            inner: Some(self.records.range::<Key, _>((lower, upper))),
        }
    }

    /// Number of records in `range`
    pub fn count(&self, range: &KeyRange) -> usize {
        if range.is_unbounded() {
            return self.records.len();
        }
        self.range(range).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove all records
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Iterate every record in key order
    pub fn iter(&self) -> btree_map::Iter<'_, Key, Value> {
        self.records.iter()
    }
}

/// Lazy iterator over a slice of a record store
pub struct Records<'a> {
    inner: Option<btree_map::Range<'a, Key, Value>>,
}

impl<'a> Iterator for Records<'a> {
    type Item = (&'a Key, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut()?.next()
    }
}

impl<'a> DoubleEndedIterator for Records<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.as_mut()?.next_back()
    }
}
