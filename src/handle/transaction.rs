//! Transaction handles

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config::Durability;
use crate::engine::{
    Lease, Shared, TransactionId, TransactionMode, TransactionRecord, TransactionState,
};
use crate::error::{IdbError, Result};
use crate::event::{EventSource, EventTarget, ListenerTable};

use super::{Connection, ObjectStore};

/// A unit of work over a fixed set of object stores
#[derive(Clone)]
pub struct Transaction {
    shared: Rc<Shared>,
    id: TransactionId,
    lease: Rc<Lease>,
}

impl Transaction {
    pub(crate) fn new(shared: Rc<Shared>, id: TransactionId, lease: Rc<Lease>) -> Self {
        Self { shared, id, lease }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    fn read<T>(&self, f: impl FnOnce(&TransactionRecord) -> T) -> Option<T> {
        self.shared.state.borrow().transactions.get(&self.id).map(f)
    }

    pub fn mode(&self) -> TransactionMode {
        self.read(|t| t.mode).unwrap_or_default()
    }

    pub fn durability(&self) -> Durability {
        self.read(|t| t.durability).unwrap_or_default()
    }

    pub fn state(&self) -> TransactionState {
        self.read(|t| t.state).unwrap_or(TransactionState::Aborted)
    }

    /// Whether requests can be placed right now
    pub fn accepts_requests(&self) -> bool {
        self.read(|t| t.is_active()).unwrap_or(false)
    }

    /// Why the transaction aborted; `None` for a caller abort or while running
    pub fn error(&self) -> Option<IdbError> {
        self.read(|t| t.error.clone()).flatten()
    }

    /// Store names in scope, sorted; every store of the database during an
    /// upgrade
    pub fn object_store_names(&self) -> Vec<String> {
        let state = self.shared.state.borrow();
        match state.transactions.get(&self.id) {
            Some(t) if t.mode == TransactionMode::VersionChange => state
                .databases
                .get(&t.database)
                .map(|db| db.store_names())
                .unwrap_or_default(),
            Some(t) => t.scope_names.clone(),
            None => Vec::new(),
        }
    }

    /// A store in scope
    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        let store = {
            let state = self.shared.state.borrow();
            let record = state.transaction(self.id)?;
            if record.state.is_finished() {
                return Err(IdbError::InvalidState("transaction has finished".to_string()));
            }
            let not_found = || IdbError::NotFound(format!("no object store named '{}' in scope", name));
            let store = state
                .databases
                .get(&record.database)
                .and_then(|db| db.store_id(name))
                .ok_or_else(not_found)?;
            if record.mode != TransactionMode::VersionChange && !record.scope.contains(&store) {
                return Err(not_found());
            }
            store
        };
        Ok(ObjectStore::new(
            Rc::clone(&self.shared),
            self.id,
            store,
            Rc::clone(&self.lease),
        ))
    }

    /// Abort, undoing every change the transaction made
    pub fn abort(&self) -> Result<()> {
        self.shared.abort_by_caller(self.id)
    }

    /// Commit as soon as the queued requests have run
    pub fn commit(&self) -> Result<()> {
        self.shared.request_commit(self.id)
    }

    pub fn connection(&self) -> Option<Connection> {
        let connection = self.read(|t| t.connection)?;
        Some(Connection::new(Rc::clone(&self.shared), connection))
    }
}

impl EventSource for Transaction {
    fn event_target(&self) -> EventTarget {
        EventTarget::Transaction(self.id)
    }

    fn listener_table(&self) -> &RefCell<ListenerTable> {
        &self.shared.listeners
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .field("state", &self.state())
            .finish()
    }
}
