//! Cursor iteration
//!
//! A cursor remembers where it is (`position`, plus the primary key
//! position for index sources) and moves by searching the source for the
//! first entry strictly past that position in its direction.
//!
//! ```text
//!   next        first (key, pk) after (position, pk position)
//!   nextunique  first key after position, lowest pk of that key
//!   prev        last (key, pk) before (position, pk position)
//!   prevunique  last key before position, lowest pk of that key
//! ```

use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::error::{IdbError, Result};
use crate::key::{max_lower, min_upper, Key, KeyRange};
use crate::storage::{IndexId, IndexStore, ObjectStoreData, RecordStore, StoreId};
use crate::value::Value;

use super::{Operation, RequestId, RequestOrigin, Shared, Source, TransactionId};

/// Iteration direction of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn is_forward(&self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CursorRecord {
    pub transaction: TransactionId,
    pub request: RequestId,
    pub store: StoreId,
    pub index: Option<IndexId>,
    pub direction: CursorDirection,
    pub range: KeyRange,
    pub key_only: bool,
    pub position: Option<Key>,
    pub object_store_position: Option<Key>,
    pub key: Option<Key>,
    pub primary_key: Option<Key>,
    pub value: Option<Value>,
    pub got_value: bool,
}

impl CursorRecord {
    pub(crate) fn new(
        transaction: TransactionId,
        request: RequestId,
        store: StoreId,
        index: Option<IndexId>,
        direction: CursorDirection,
        range: KeyRange,
        key_only: bool,
    ) -> Self {
        Self {
            transaction,
            request,
            store,
            index,
            direction,
            range,
            key_only,
            position: None,
            object_store_position: None,
            key: None,
            primary_key: None,
            value: None,
            got_value: false,
        }
    }

    /// Move `count` steps. Returns whether a record was found; on `false`
    /// the cursor has run off the end of its range.
    pub(crate) fn iterate(
        &mut self,
        store: &ObjectStoreData,
        mut key: Option<Key>,
        mut primary_key: Option<Key>,
        count: u32,
    ) -> Result<bool> {
        let index = match self.index {
            Some(id) => Some(
                &store
                    .indexes
                    .get(&id)
                    .ok_or_else(|| IdbError::InvalidState("index has been deleted".to_string()))?
                    .entries,
            ),
            None => None,
        };

        for _ in 0..count {
            let found = match index {
                None => step_records(
                    &store.records,
                    &self.range,
                    self.direction,
                    self.position.as_ref(),
                    key.as_ref(),
                )
                .map(|k| (k.clone(), k)),
                Some(entries) => step_index(
                    entries,
                    &self.range,
                    self.direction,
                    (self.position.as_ref(), self.object_store_position.as_ref()),
                    (key.as_ref(), primary_key.as_ref()),
                ),
            };
            let Some((position, primary)) = found else {
                self.key = None;
                self.primary_key = None;
                self.value = None;
                if self.index.is_some() {
                    self.object_store_position = None;
                }
                return Ok(false);
            };
            self.position = Some(position);
            if self.index.is_some() {
                self.object_store_position = Some(primary);
            }
            key = None;
            primary_key = None;
        }

        self.key = self.position.clone();
        self.primary_key = match self.index {
            Some(_) => self.object_store_position.clone(),
            None => self.position.clone(),
        };
        self.value = match (&self.primary_key, self.key_only) {
            (Some(pk), false) => store.records.get(pk).cloned(),
            _ => None,
        };
        self.got_value = true;
        Ok(true)
    }
}

impl Shared {
    /// Create a cursor and queue its first positioning step.
    ///
    /// Returns the request that delivers the cursor.
    pub(crate) fn open_cursor(
        &self,
        txn: TransactionId,
        source: Source,
        range: KeyRange,
        direction: CursorDirection,
        key_only: bool,
    ) -> RequestId {
        let cursor = self.state.borrow_mut().next_cursor_id();
        let (store, index, origin) = match source {
            Source::Store(store) => (store, None, RequestOrigin::Store(store)),
            Source::Index(store, index) => (store, Some(index), RequestOrigin::Index(store, index)),
        };
        let request = self.submit(
            txn,
            origin,
            Operation::Iterate {
                cursor,
                key: None,
                primary_key: None,
                count: 1,
            },
        );
        let mut state = self.state.borrow_mut();
        state.cursors.insert(
            cursor,
            CursorRecord::new(txn, request, store, index, direction, range, key_only),
        );
        if let Some(record) = state.transactions.get_mut(&txn) {
            record.cursors.push(cursor);
        }
        request
    }
}

fn included(key: Option<&Key>) -> Bound<&Key> {
    key.map_or(Bound::Unbounded, Bound::Included)
}

fn excluded(key: Option<&Key>) -> Bound<&Key> {
    key.map_or(Bound::Unbounded, Bound::Excluded)
}

/// One step over an object store; keys are unique, so the unique
/// directions behave like their plain counterparts
fn step_records(
    records: &RecordStore,
    range: &KeyRange,
    direction: CursorDirection,
    position: Option<&Key>,
    key: Option<&Key>,
) -> Option<Key> {
    if direction.is_forward() {
        let lower = max_lower(excluded(position), included(key));
        records
            .range_within(range, lower, Bound::Unbounded)
            .next()
            .map(|(k, _)| k.clone())
    } else {
        let upper = min_upper(excluded(position), included(key));
        records
            .range_within(range, Bound::Unbounded, upper)
            .next_back()
            .map(|(k, _)| k.clone())
    }
}

/// One step over an index, yielding `(index key, primary key)`.
///
/// `position` and `target` are `(key, primary key)` pairs; the target is
/// what `continue`/`continue_primary_key` asked for.
fn step_index(
    entries: &IndexStore,
    range: &KeyRange,
    direction: CursorDirection,
    position: (Option<&Key>, Option<&Key>),
    target: (Option<&Key>, Option<&Key>),
) -> Option<(Key, Key)> {
    let (pos, pos_pk) = position;
    let (key, key_pk) = target;
    match direction {
        CursorDirection::Next => {
            let lower = max_lower(included(pos), included(key));
            entries
                .range_within(range, lower, Bound::Unbounded)
                .find(|(ik, pk)| {
                    let past_target = match (key, key_pk) {
                        (Some(k), Some(p)) => *ik > k || (*ik == k && *pk >= p),
                        (Some(k), None) => *ik >= k,
                        _ => true,
                    };
                    let past_position = match (pos, pos_pk) {
                        (Some(k), Some(p)) => *ik > k || (*ik == k && *pk > p),
                        (Some(k), None) => *ik > k,
                        _ => true,
                    };
                    past_target && past_position
                })
                .map(|(ik, pk)| (ik.clone(), pk.clone()))
        }
        CursorDirection::Prev => {
            let upper = min_upper(included(pos), included(key));
            entries
                .range_within(range, Bound::Unbounded, upper)
                .rev()
                .find(|(ik, pk)| {
                    let before_target = match (key, key_pk) {
                        (Some(k), Some(p)) => *ik < k || (*ik == k && *pk <= p),
                        (Some(k), None) => *ik <= k,
                        _ => true,
                    };
                    let before_position = match (pos, pos_pk) {
                        (Some(k), Some(p)) => *ik < k || (*ik == k && *pk < p),
                        (Some(k), None) => *ik < k,
                        _ => true,
                    };
                    before_target && before_position
                })
                .map(|(ik, pk)| (ik.clone(), pk.clone()))
        }
        CursorDirection::NextUnique => {
            let lower = max_lower(excluded(pos), included(key));
            entries
                .groups_within(range, lower, Bound::Unbounded)?
                .next()
                .and_then(|(ik, pks)| pks.first().map(|pk| (ik.clone(), pk.clone())))
        }
        CursorDirection::PrevUnique => {
            let upper = min_upper(excluded(pos), included(key));
            entries
                .groups_within(range, Bound::Unbounded, upper)?
                .next_back()
                .and_then(|(ik, pks)| pks.first().map(|pk| (ik.clone(), pk.clone())))
        }
    }
}
