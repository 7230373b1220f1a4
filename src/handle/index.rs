//! Index handles

use std::cell::Ref;
use std::fmt;
use std::rc::Rc;

use crate::engine::{
    CursorDirection, Lease, Operation, RequestOrigin, Shared, Source, TransactionId, TransactionMode,
    Want,
};
use crate::error::{IdbError, Result};
use crate::key::{KeyRange, Query};
use crate::keypath::KeyPath;
use crate::storage::{IndexData, IndexId, StoreId};

use super::object_store::check_request;
use super::{ObjectStore, Request};

/// An index as seen through one transaction
#[derive(Clone)]
pub struct Index {
    shared: Rc<Shared>,
    txn: TransactionId,
    store: StoreId,
    index: IndexId,
    lease: Rc<Lease>,
}

impl Index {
    pub(crate) fn new(
        shared: Rc<Shared>,
        txn: TransactionId,
        store: StoreId,
        index: IndexId,
        lease: Rc<Lease>,
    ) -> Self {
        Self {
            shared,
            txn,
            store,
            index,
            lease,
        }
    }

    fn data(&self) -> Option<Ref<'_, IndexData>> {
        Ref::filter_map(self.shared.state.borrow(), |state| {
            state.store(self.txn, self.store)?.indexes.get(&self.index)
        })
        .ok()
    }

    fn source(&self) -> Source {
        Source::Index(self.store, self.index)
    }

    fn submit(&self, operation: Operation) -> Request {
        let id = self.shared.submit(
            self.txn,
            RequestOrigin::Index(self.store, self.index),
            operation,
        );
        Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease))
    }

    fn read_range(&self, query: Query, null_disallowed: bool) -> Result<KeyRange> {
        let state = self.shared.state.borrow();
        check_request(&state, self.txn, self.store, Some(self.index), false)?;
        query.into_range(null_disallowed)
    }

    pub fn name(&self) -> String {
        self.data().map(|d| d.name.clone()).unwrap_or_default()
    }

    /// Rename the index (upgrade only)
    pub fn set_name(&self, name: &str) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let record = state.transaction(self.txn)?;
        if record.mode != TransactionMode::VersionChange {
            return Err(IdbError::InvalidState(
                "indexes can only be renamed during an upgrade".to_string(),
            ));
        }
        let active = record.is_active();
        let exists = state
            .store(self.txn, self.store)
            .is_some_and(|s| s.indexes.contains_key(&self.index));
        if !exists {
            return Err(IdbError::InvalidState("index has been deleted".to_string()));
        }
        if !active {
            return Err(IdbError::TransactionInactive(
                "transaction is not active".to_string(),
            ));
        }
        let db = state
            .database_of_mut(self.txn)
            .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;
        db.rename_index(self.store, self.index, name)
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.data().map(|d| d.key_path.clone())
    }

    pub fn unique(&self) -> bool {
        self.data().is_some_and(|d| d.unique)
    }

    pub fn multi_entry(&self) -> bool {
        self.data().is_some_and(|d| d.multi_entry)
    }

    pub fn object_store(&self) -> ObjectStore {
        ObjectStore::new(Rc::clone(&self.shared), self.txn, self.store, Rc::clone(&self.lease))
    }

    /// Value of the record with the lowest index key in `query`
    pub fn get(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), true)?;
        Ok(self.submit(Operation::Get {
            source: self.source(),
            range,
            want: Want::Value,
        }))
    }

    /// Primary key of the record with the lowest index key in `query`
    pub fn get_key(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), true)?;
        Ok(self.submit(Operation::Get {
            source: self.source(),
            range,
            want: Want::Key,
        }))
    }

    pub fn get_all(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::GetAll {
            source: self.source(),
            range,
            count,
            want: Want::Value,
        }))
    }

    pub fn get_all_keys(&self, query: impl Into<Query>, count: Option<u32>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::GetAll {
            source: self.source(),
            range,
            count,
            want: Want::Key,
        }))
    }

    /// Number of index entries in `query`
    pub fn count(&self, query: impl Into<Query>) -> Result<Request> {
        let range = self.read_range(query.into(), false)?;
        Ok(self.submit(Operation::Count {
            source: self.source(),
            range,
        }))
    }

    pub fn open_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Request> {
        self.cursor(query.into(), direction, false)
    }

    pub fn open_key_cursor(&self, query: impl Into<Query>, direction: CursorDirection) -> Result<Request> {
        self.cursor(query.into(), direction, true)
    }

    fn cursor(&self, query: Query, direction: CursorDirection, key_only: bool) -> Result<Request> {
        let range = self.read_range(query, false)?;
        let id = self
            .shared
            .open_cursor(self.txn, self.source(), range, direction, key_only);
        Ok(Request::new(Rc::clone(&self.shared), id, Rc::clone(&self.lease)))
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name())
            .field("transaction", &self.txn)
            .finish()
    }
}
