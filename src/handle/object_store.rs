//! Object store handles
//!
//! Every request method validates synchronously and in a fixed order
//! before anything is queued:
//!
//! ```text
//!   store (or index) deleted   → InvalidStateError
//!   transaction not active     → TransactionInactiveError
//!   write in readonly          → ReadOnlyError
//!   bad key, value or range    → DataError
//! ```

use std::cell::Ref;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::engine::{
    CursorDirection, Lease, Operation, RequestOrigin, Shared, Source, State, Task, TransactionId,
    TransactionMode, Want,
};
use crate::error::{IdbError, Result};
use crate::key::{to_key, Key, KeyRange, Query};
use crate::keypath::{can_inject_key, Extracted, KeyPath};
use crate::storage::{IndexData, IndexId, ObjectStoreData, StoreId};
use crate::value::Value;

use super::{Index, IndexParameters, Request, Transaction};

/// Validate a request against a store (and optionally one of its indexes)
pub(super) fn check_request(
    state: &State,
    txn: TransactionId,
    store: StoreId,
    index: Option<IndexId>,
    write: bool,
) -> Result<()> {
    let record = state.transaction(txn)?;
    let data = state
        .store(txn, store)
        .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
    if let Some(index) = index {
        if !data.indexes.contains_key(&index) {
            return Err(IdbError::InvalidState("index has been deleted".to_string()));
        }
    }
    if !record.is_active() {
        return Err(IdbError::TransactionInactive(
            "transaction is not active".to_string(),
        ));
    }
    if write && record.mode == TransactionMode::ReadOnly {
        return Err(IdbError::ReadOnly(
            "transaction is readonly".to_string(),
        ));
    }
    Ok(())
}

/// A store as seen through one transaction
#[derive(Clone)]
pub struct ObjectStore {
    shared: Rc<Shared>,
    txn: TransactionId,
    store: StoreId,
    lease: Rc<Lease>,
}

impl ObjectStore {
    pub(crate) fn new(shared: Rc<Shared>, txn: TransactionId, store: StoreId, lease: Rc<Lease>) -> Self {
        Self {
            shared,
            txn,
            store,
            lease,
        }
    }

    fn data(&self) -> Option<Ref<'_, ObjectStoreData>> {
        Ref::filter_map(self.shared.state.borrow(), |state| state.store(self.txn, self.store)).ok()
    }

    fn submit(&self, operation: Operation) -> Request {
        let id = self
            .shared
            .submit(self.txn, RequestOrigin::Store(self.store), operation);
        Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Current name; empty once the store has been deleted
    pub fn name(&self) -> String {
        self.data().map(|d| d.name.clone()).unwrap_or_default()
    }

    /// Rename the store (upgrade only)
    pub fn set_name(&self, name: &str) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let record = state.transaction(self.txn)?;
        if record.mode != TransactionMode::VersionChange {
            return Err(IdbError::InvalidState(
                "stores can only be renamed during an upgrade".to_string(),
            ));
        }
        let active = record.is_active();
        if state.store(self.txn, self.store).is_none() {
            return Err(IdbError::InvalidState("object store has been deleted".to_string()));
        }
        if !active {
            return Err(IdbError::TransactionInactive(
                "transaction is not active".to_string(),
            ));
        }
        let db = state
            .database_of_mut(self.txn)
            .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;
        db.rename_store(self.store, name)
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.data().and_then(|d| d.key_path.clone())
    }

    pub fn auto_increment(&self) -> bool {
        self.data().is_some_and(|d| d.auto_increment())
    }

    /// Index names, sorted
    pub fn index_names(&self) -> Vec<String> {
        self.data().map(|d| d.index_names()).unwrap_or_default()
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::new(Rc::clone(&self.shared), self.txn, Rc::clone(&self.lease))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace a record keyed by the store's key path or generator
    pub fn put(&self, value: impl Into<Value>) -> Result<Request> {
        self.store_value(value.into(), None, false)
    }

    /// Insert or replace a record under an explicit (out-of-line) key
    pub fn put_with_key(&self, value: impl Into<Value>, key: impl Into<Value>) -> Result<Request> {
        self.store_value(value.into(), Some(key.into()), false)
    }

    /// Insert a record; the request fails with ConstraintError if the key exists
    pub fn add(&self, value: impl Into<Value>) -> Result<Request> {
        self.store_value(value.into(), None, true)
    }

    pub fn add_with_key(&self, value: impl Into<Value>, key: impl Into<Value>) -> Result<Request> {
        self.store_value(value.into(), Some(key.into()), true)
    }

    fn store_value(&self, value: Value, key: Option<Value>, no_overwrite: bool) -> Result<Request> {
        let key = {
            let state = self.shared.state.borrow();
            check_request(&state, self.txn, self.store, None, true)?;
            let data = state
                .store(self.txn, self.store)
                .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
            resolve_key(data, &value, key)?
        };
        Ok(self.submit(Operation::Store {
            store: self.store,
            value,
            key,
            no_overwrite,
        }))
    }

    /// Delete every record matching `query`; a bare value is a single key
    pub fn delete(&self, query: impl Into<Query>) -> Result<Request> {
        let range = {
            let state = self.shared.state.borrow();
            check_request(&state, self.txn, self.store, None, true)?;
            query.into().into_range(true)?
        };
        Ok(self.submit(Operation::Delete {
            store: self.store,
            range,
        }))
    }

    pub fn clear(&self) -> Result<Request> {
        check_request(&self.shared.state.borrow(), self.txn, self.store, None, true)?;
        Ok(self.submit(Operation::Clear { store: self.store }))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn read_range(&self, query: Query, null_disallowed: bool) -> Result<KeyRange> {
        let state = self.shared.state.borrow();
        check_request(&state, self.txn, self.store, None, false)?;
        query.into_range(null_disallowed)
    }

    /// Value of the first record matching `query`, or undefined
    pub fn get(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), true)?;
        Ok(self.submit(Operation::Get {
            source: Source::Store(self.store),
            range,
            want: Want::Value,
        }))
    }

    /// Primary key of the first record matching `query`, or undefined
    pub fn get_key(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), true)?;
        Ok(self.submit(Operation::Get {
            source: Source::Store(self.store),
            range,
            want: Want::Key,
        }))
    }

    /// Values of the records matching `query` in key order; `count` of
    /// `None` or `Some(0)` means no limit
    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::GetAll {
            source: Source::Store(self.store),
            range,
            count,
            want: Want::Value,
        }))
    }

    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::GetAll {
            source: Source::Store(self.store),
            range,
            count,
            want: Want::Key,
        }))
    }

    pub fn count(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::Count {
            source: Source::Store(self.store),
            range,
        }))
    }

    pub fn open_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Request> {
        self.cursor(query.into(), direction, false)
    }

    /// Like `open_cursor`, without loading values
    pub fn open_key_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Request> {
        self.cursor(query.into(), direction, true)
    }

    fn cursor(&self, query: Query, direction: CursorDirection, key_only: bool) -> Result<Request> {
        let range = self.read_range(query, false)?;
        let id = self
            .shared
            .open_cursor(self.txn, Source::Store(self.store), range, direction, key_only);
        Ok(Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease)))
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Create an index and populate it from the existing records (upgrade
    /// only). Existing records that violate a unique index abort the
    /// upgrade with ConstraintError.
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        params: IndexParameters,
    ) -> Result<Index> {
        let key_path = key_path.into();
        let mut state = self.shared.state.borrow_mut();

        // Step 1: Checks
        let record = state.transaction(self.txn)?;
        if record.mode != TransactionMode::VersionChange {
            return Err(IdbError::InvalidState(
                "indexes can only be created during an upgrade".to_string(),
            ));
        }
        let active = record.is_active();
        let data = state
            .store(self.txn, self.store)
            .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
        if !active {
            return Err(IdbError::TransactionInactive(
                "transaction is not active".to_string(),
            ));
        }
        if data.index_id(name).is_some() {
            return Err(IdbError::Constraint(format!("index '{}' already exists", name)));
        }
        key_path.validate()?;
        if params.multi_entry && key_path.is_sequence() {
            return Err(IdbError::InvalidAccess(
                "a multi-entry index cannot use a compound key path".to_string(),
            ));
        }

        // Step 2: Create and populate
        let db = state
            .database_of_mut(self.txn)
            .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;
        let (index, populated) = db.create_index(
            self.store,
            IndexData::new(name, key_path, params.unique, params.multi_entry),
        );
        drop(state);
        debug!(txn = self.txn.0, index = name, "index created");

        // Step 3: A collision aborts the upgrade, after this call returns
        if let Err(error) = populated {
            debug!(txn = self.txn.0, index = name, %error, "index population failed");
            self.shared.queue_task(Task::AbortTransaction(self.txn, error));
        }
        Ok(Index::new(
            Rc::clone(&self.shared),
            self.txn,
            self.store,
            index,
            Rc::clone(&self.lease),
        ))
    }

    /// An index of this store
    pub fn index(&self, name: &str) -> Result<Index> {
        let index = {
            let state = self.shared.state.borrow();
            if state.transaction(self.txn)?.state.is_finished() {
                return Err(IdbError::InvalidState("transaction has finished".to_string()));
            }
            let data = state
                .store(self.txn, self.store)
                .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
            data.index_id(name)
                .ok_or_else(|| IdbError::NotFound(format!("no index named '{}'", name)))?
        };
        Ok(Index::new(
            Rc::clone(&self.shared),
            self.txn,
            self.store,
            index,
            Rc::clone(&self.lease),
        ))
    }

    /// Delete an index (upgrade only)
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let record = state.transaction(self.txn)?;
        if record.mode != TransactionMode::VersionChange {
            return Err(IdbError::InvalidState(
                "indexes can only be deleted during an upgrade".to_string(),
            ));
        }
        let active = record.is_active();
        if state.store(self.txn, self.store).is_none() {
            return Err(IdbError::InvalidState("object store has been deleted".to_string()));
        }
        if !active {
            return Err(IdbError::TransactionInactive(
                "transaction is not active".to_string(),
            ));
        }
        let data = state
            .database_of_mut(self.txn)
            .and_then(|db| db.store_mut(self.store))
            .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
        let index = data
            .index_id(name)
            .ok_or_else(|| IdbError::NotFound(format!("no index named '{}'", name)))?;
        data.delete_index(index);
        debug!(txn = self.txn.0, index = name, "index deleted");
        Ok(())
    }
}

/// Work out the key a write request carries.
///
/// `None` means the store's key generator will supply it.
fn resolve_key(data: &ObjectStoreData, value: &Value, key: Option<Value>) -> Result<Option<Key>> {
    match (&data.key_path, key) {
        (Some(_), Some(_)) => Err(IdbError::Data(
            "a store with in-line keys does not accept an explicit key".to_string(),
        )),
        (Some(path), None) => match path.extract(value) {
            Extracted::Key(key) => Ok(Some(key)),
            Extracted::Invalid => Err(IdbError::Data(
                "the key path yielded an invalid key".to_string(),
            )),
            Extracted::Missing if !data.auto_increment() => Err(IdbError::Data(
                "the key path yielded no key and the store has no key generator".to_string(),
            )),
            Extracted::Missing => match path {
                KeyPath::Path(p) if can_inject_key(value, p) => Ok(None),
                _ => Err(IdbError::Data(
                    "a generated key cannot be stored into the value".to_string(),
                )),
            },
        },
        (None, Some(key)) => Ok(Some(to_key(&key)?)),
        (None, None) if data.auto_increment() => Ok(None),
        (None, None) => Err(IdbError::Data(
            "a store with out-of-line keys and no key generator needs a key".to_string(),
        )),
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.name())
            .field("transaction", &self.txn)
            .finish()
    }
}
