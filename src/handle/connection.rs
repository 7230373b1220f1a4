//! Database connections

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::config::Durability;
use crate::engine::{
    ConnectionId, Owner, Shared, TransactionId, TransactionMode, TransactionRecord,
};
use crate::error::{IdbError, Result};
use crate::event::{EventSource, EventTarget, ListenerTable};
use crate::key::sort_names;
use crate::keypath::KeyPath;

use super::{ObjectStore, ObjectStoreParameters, Transaction};

/// An open connection to one database
#[derive(Clone)]
pub struct Connection {
    shared: Rc<Shared>,
    id: ConnectionId,
}

impl Connection {
    pub(crate) fn new(shared: Rc<Shared>, id: ConnectionId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> String {
        self.shared
            .state
            .borrow()
            .connections
            .get(&self.id)
            .map(|c| c.database.clone())
            .unwrap_or_default()
    }

    /// Version this connection was opened at
    pub fn version(&self) -> u64 {
        self.shared
            .state
            .borrow()
            .connections
            .get(&self.id)
            .map_or(0, |c| c.version)
    }

    /// Store names, sorted
    pub fn object_store_names(&self) -> Vec<String> {
        let state = self.shared.state.borrow();
        state
            .connections
            .get(&self.id)
            .and_then(|c| state.databases.get(&c.database))
            .map(|db| db.store_names())
            .unwrap_or_default()
    }

    /// Close once every transaction on the connection has finished.
    ///
    /// No new transactions can be created after this call.
    pub fn close(&self) {
        debug!(connection = self.id.0, "close requested");
        self.shared.close_connection(self.id);
    }

    /// Start a transaction with the configured default durability
    pub fn transaction<I, S>(&self, store_names: I, mode: TransactionMode) -> Result<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction_with_durability(store_names, mode, self.shared.config.default_durability)
    }

    pub fn transaction_with_durability<I, S>(
        &self,
        store_names: I,
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Step 1: Connection checks
        let (database, scope, names) = {
            let state = self.shared.state.borrow();
            let connection = state.connection(self.id)?;
            let upgrading = connection
                .upgrade
                .and_then(|txn| state.transactions.get(&txn))
                .is_some_and(|t| !t.state.is_finished());
            if upgrading {
                return Err(IdbError::InvalidState(
                    "a version change transaction is running".to_string(),
                ));
            }
            if connection.close_pending {
                return Err(IdbError::InvalidState("connection is closing".to_string()));
            }
            let db = state
                .databases
                .get(&connection.database)
                .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;

            // Step 2: Resolve the scope
            let mut names: Vec<String> = store_names
                .into_iter()
                .map(|name| name.as_ref().to_string())
                .collect();
            sort_names(&mut names);
            names.dedup();
            let mut scope = BTreeSet::new();
            for name in &names {
                let id = db.store_id(name).ok_or_else(|| {
                    IdbError::NotFound(format!("no object store named '{}'", name))
                })?;
                scope.insert(id);
            }
            if scope.is_empty() {
                return Err(IdbError::InvalidAccess(
                    "a transaction needs at least one object store".to_string(),
                ));
            }
            (connection.database.clone(), scope, names)
        };

        // Step 3: Mode
        if mode == TransactionMode::VersionChange {
            return Err(IdbError::Type(
                "version change transactions are created by open".to_string(),
            ));
        }

        let record = TransactionRecord::new(self.id, database, mode, durability, scope, names);
        let id = self.shared.create_transaction(record);
        let lease = self.shared.lease(Owner::Transaction(id));
        Ok(Transaction::new(Rc::clone(&self.shared), id, lease))
    }

    // =========================================================================
    // Schema (upgrade only)
    // =========================================================================

    /// Create an object store inside the upgrade transaction
    pub fn create_object_store(
        &self,
        name: &str,
        params: ObjectStoreParameters,
    ) -> Result<ObjectStore> {
        let txn = self.upgrade_transaction()?;
        let mut state = self.shared.state.borrow_mut();
        let db = state
            .database_of_mut(txn)
            .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;

        if let Some(path) = &params.key_path {
            path.validate()?;
        }
        if db.store_id(name).is_some() {
            return Err(IdbError::Constraint(format!(
                "object store '{}' already exists",
                name
            )));
        }
        if params.auto_increment {
            let unusable = match &params.key_path {
                Some(KeyPath::Sequence(_)) => true,
                Some(path) => path.is_empty_path(),
                None => false,
            };
            if unusable {
                return Err(IdbError::InvalidAccess(
                    "auto-increment needs an out-of-line key or a non-empty key path".to_string(),
                ));
            }
        }

        let store = db.create_store(name, params.key_path, params.auto_increment);
        if let Some(record) = state.transactions.get_mut(&txn) {
            record.scope.insert(store);
        }
        debug!(txn = txn.0, store = name, "object store created");
        drop(state);
        let lease = self.shared.lease(Owner::Transaction(txn));
        Ok(ObjectStore::new(Rc::clone(&self.shared), txn, store, lease))
    }

    /// Delete an object store inside the upgrade transaction
    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        let txn = self.upgrade_transaction()?;
        let mut state = self.shared.state.borrow_mut();
        let db = state
            .database_of_mut(txn)
            .ok_or_else(|| IdbError::InvalidState("database no longer exists".to_string()))?;
        let store = db
            .store_id(name)
            .ok_or_else(|| IdbError::NotFound(format!("no object store named '{}'", name)))?;
        db.delete_store(store);
        if let Some(record) = state.transactions.get_mut(&txn) {
            record.scope.remove(&store);
        }
        debug!(txn = txn.0, store = name, "object store deleted");
        Ok(())
    }

    /// The running upgrade transaction, which must be active
    fn upgrade_transaction(&self) -> Result<TransactionId> {
        let state = self.shared.state.borrow();
        let txn = state
            .connection(self.id)?
            .upgrade
            .filter(|txn| {
                state
                    .transactions
                    .get(txn)
                    .is_some_and(|t| !t.state.is_finished())
            })
            .ok_or_else(|| {
                IdbError::InvalidState("not inside a version change transaction".to_string())
            })?;
        if !state.transaction(txn)?.is_active() {
            return Err(IdbError::TransactionInactive(
                "version change transaction is not active".to_string(),
            ));
        }
        Ok(txn)
    }
}

impl EventSource for Connection {
    fn event_target(&self) -> EventTarget {
        EventTarget::Connection(self.id)
    }

    fn listener_table(&self) -> &RefCell<ListenerTable> {
        &self.shared.listeners
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}
