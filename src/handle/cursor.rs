//! Cursor handles
//!
//! A cursor is delivered as the result of its own request. Each move
//! (`advance`, `continue_*`) re-queues that same request, which fires
//! `success` again with either the cursor or null at the end of the range.
//! Between the move and that event the cursor has no value and cannot be
//! moved again.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::engine::{
    CursorDirection, CursorId, CursorRecord, Lease, Operation, RequestOrigin, Shared, State,
    TransactionMode,
};
use crate::error::{IdbError, Result};
use crate::key::{to_key, Key, KeyRange};
use crate::keypath::Extracted;
use crate::value::Value;

use super::{Index, ObjectStore, Request};

/// Store or index a cursor walks
#[derive(Debug, Clone)]
pub enum CursorSource {
    ObjectStore(ObjectStore),
    Index(Index),
}

/// A position in a store or index
#[derive(Clone)]
pub struct Cursor {
    shared: Rc<Shared>,
    id: CursorId,
    lease: Rc<Lease>,
}

impl Cursor {
    pub(crate) fn new(shared: Rc<Shared>, id: CursorId, lease: Rc<Lease>) -> Self {
        Self { shared, id, lease }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    fn read<T>(&self, f: impl FnOnce(&CursorRecord) -> T) -> Option<T> {
        self.shared.state.borrow().cursors.get(&self.id).map(f)
    }

    pub fn direction(&self) -> CursorDirection {
        self.read(|c| c.direction).unwrap_or_default()
    }

    /// Key at the current position: the index key for index cursors
    pub fn key(&self) -> Option<Key> {
        self.read(|c| c.key.clone()).flatten()
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.read(|c| c.primary_key.clone()).flatten()
    }

    /// Record value; always `None` for key cursors
    pub fn value(&self) -> Option<Value> {
        self.read(|c| c.value.clone()).flatten()
    }

    pub fn is_key_only(&self) -> bool {
        self.read(|c| c.key_only).unwrap_or(true)
    }

    pub fn source(&self) -> Option<CursorSource> {
        let (txn, store, index) = self.read(|c| (c.transaction, c.store, c.index))?;
        let (shared, lease) = (Rc::clone(&self.shared), Rc::clone(&self.lease));
        Some(match index {
            Some(index) => CursorSource::Index(Index::new(shared, txn, store, index, lease)),
            None => CursorSource::ObjectStore(ObjectStore::new(shared, txn, store, lease)),
        })
    }

    /// The request that delivers this cursor
    pub fn request(&self) -> Option<Request> {
        let request = self.read(|c| c.request)?;
        Some(Request::new(Rc::clone(&self.shared), request, Rc::clone(&self.lease)))
    }

    // =========================================================================
    // Movement
    // =========================================================================

    /// Skip `count` records. `count` must be an integer from 1 to 2^32 - 1;
    /// anything else is a TypeError.
    pub fn advance(&self, count: impl Into<Value>) -> Result<()> {
        let count = match count.into() {
            Value::Number(n) if n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64 => n as u32,
            other => {
                return Err(IdbError::Type(format!(
                    "advance count must be a positive integer, got {:?}",
                    other
                )))
            }
        };
        check_movable(&self.shared.state.borrow(), self.id)?;
        self.iterate(None, None, count);
        Ok(())
    }

    /// Move to the next record in the cursor's direction
    pub fn continue_(&self) -> Result<()> {
        check_movable(&self.shared.state.borrow(), self.id)?;
        self.iterate(None, None, 1);
        Ok(())
    }

    /// Move to the first record at or past `key`; `key` must lie strictly
    /// beyond the current position in the cursor's direction
    pub fn continue_with_key(&self, key: impl Into<Value>) -> Result<()> {
        let key = {
            let state = self.shared.state.borrow();
            let cursor = check_movable(&state, self.id)?;
            let key = to_key(&key.into())?;
            if let Some(position) = &cursor.position {
                let behind = if cursor.direction.is_forward() {
                    key <= *position
                } else {
                    key >= *position
                };
                if behind {
                    return Err(IdbError::Data(format!(
                        "key {} is not beyond the cursor position {}",
                        key, position
                    )));
                }
            }
            key
        };
        self.iterate(Some(key), None, 1);
        Ok(())
    }

    /// Move an index cursor to the first entry at or past `(key, primary_key)`
    pub fn continue_primary_key(
        &self,
        key: impl Into<Value>,
        primary_key: impl Into<Value>,
    ) -> Result<()> {
        let (key, primary_key) = {
            let state = self.shared.state.borrow();
            let cursor = check_movable_source(&state, self.id)?;
            if cursor.index.is_none() {
                return Err(IdbError::InvalidAccess(
                    "continue_primary_key needs an index cursor".to_string(),
                ));
            }
            if cursor.direction.is_unique() {
                return Err(IdbError::InvalidAccess(
                    "continue_primary_key is not allowed on unique cursors".to_string(),
                ));
            }
            if !cursor.got_value {
                return Err(IdbError::InvalidState("cursor is already moving".to_string()));
            }
            let key = to_key(&key.into())?;
            let primary_key = to_key(&primary_key.into())?;
            if let (Some(position), Some(object_position)) =
                (&cursor.position, &cursor.object_store_position)
            {
                let behind = if cursor.direction.is_forward() {
                    key < *position || (key == *position && primary_key <= *object_position)
                } else {
                    key > *position || (key == *position && primary_key >= *object_position)
                };
                if behind {
                    return Err(IdbError::Data(format!(
                        "({}, {}) is not beyond the cursor position",
                        key, primary_key
                    )));
                }
            }
            (key, primary_key)
        };
        self.iterate(Some(key), Some(primary_key), 1);
        Ok(())
    }

    fn iterate(&self, key: Option<Key>, primary_key: Option<Key>, count: u32) {
        let target = {
            let mut state = self.shared.state.borrow_mut();
            state.cursors.get_mut(&self.id).map(|cursor| {
                cursor.got_value = false;
                (cursor.transaction, cursor.request)
            })
        };
        let Some((txn, request)) = target else {
            return;
        };
        trace!(cursor = self.id.0, count, "cursor moving");
        self.shared.resubmit(
            txn,
            request,
            Operation::Iterate {
                cursor: self.id,
                key,
                primary_key,
                count,
            },
        );
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replace the record at the cursor's position
    pub fn update(&self, value: impl Into<Value>) -> Result<Request> {
        let value = value.into();
        let (txn, store, primary_key) = {
            let state = self.shared.state.borrow();
            let (cursor, primary_key) = check_writable(&state, self.id)?;
            let data = state
                .store(cursor.transaction, cursor.store)
                .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
            if let Some(path) = &data.key_path {
                match path.extract(&value) {
                    Extracted::Key(key) if key == *primary_key => {}
                    _ => {
                        return Err(IdbError::Data(
                            "the new value's key does not match the cursor's primary key"
                                .to_string(),
                        ))
                    }
                }
            }
            (cursor.transaction, cursor.store, primary_key.clone())
        };
        let id = self.shared.submit(
            txn,
            RequestOrigin::Cursor(self.id),
            Operation::Store {
                store,
                value,
                key: Some(primary_key),
                no_overwrite: false,
            },
        );
        Ok(Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease)))
    }

    /// Delete the record at the cursor's position
    pub fn delete(&self) -> Result<Request> {
        let (txn, store, primary_key) = {
            let state = self.shared.state.borrow();
            let (cursor, primary_key) = check_writable(&state, self.id)?;
            (cursor.transaction, cursor.store, primary_key.clone())
        };
        let id = self.shared.submit(
            txn,
            RequestOrigin::Cursor(self.id),
            Operation::Delete {
                store,
                range: KeyRange::only(primary_key),
            },
        );
        Ok(Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease)))
    }
}

/// Active transaction, then a source that still exists
fn check_movable_source(state: &State, id: CursorId) -> Result<&CursorRecord> {
    let cursor = state.cursor(id)?;
    if !state.transaction(cursor.transaction)?.is_active() {
        return Err(IdbError::TransactionInactive(
            "transaction is not active".to_string(),
        ));
    }
    source_exists(state, cursor)?;
    Ok(cursor)
}

fn check_movable(state: &State, id: CursorId) -> Result<&CursorRecord> {
    let cursor = check_movable_source(state, id)?;
    if !cursor.got_value {
        return Err(IdbError::InvalidState("cursor is already moving".to_string()));
    }
    Ok(cursor)
}

fn check_writable(state: &State, id: CursorId) -> Result<(&CursorRecord, &Key)> {
    let cursor = state.cursor(id)?;
    let record = state.transaction(cursor.transaction)?;
    if !record.is_active() {
        return Err(IdbError::TransactionInactive(
            "transaction is not active".to_string(),
        ));
    }
    if record.mode == TransactionMode::ReadOnly {
        return Err(IdbError::ReadOnly("transaction is readonly".to_string()));
    }
    source_exists(state, cursor)?;
    if !cursor.got_value {
        return Err(IdbError::InvalidState("cursor is not on a record".to_string()));
    }
    if cursor.key_only {
        return Err(IdbError::InvalidState("key cursors cannot write".to_string()));
    }
    let primary_key = cursor
        .primary_key
        .as_ref()
        .ok_or_else(|| IdbError::InvalidState("cursor is not on a record".to_string()))?;
    Ok((cursor, primary_key))
}

fn source_exists(state: &State, cursor: &CursorRecord) -> Result<()> {
    let store = state
        .store(cursor.transaction, cursor.store)
        .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
    if let Some(index) = cursor.index {
        if !store.indexes.contains_key(&index) {
            return Err(IdbError::InvalidState("index has been deleted".to_string()));
        }
    }
    Ok(())
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("direction", &self.direction())
            .field("key", &self.key())
            .field("primary_key", &self.primary_key())
            .finish()
    }
}
