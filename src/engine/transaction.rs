//! Transaction scheduling
//!
//! Transactions move through
//! `Pending → Active → (Committing → Committed) | (Aborting → Aborted)`.
//! A queued abort may still catch a `Committing` transaction before its
//! commit task runs.
//! `Active` means admitted: the transaction may run its requests. Whether
//! it currently accepts new requests is the separate active-window flag.
//!
//! A pending transaction is admitted once no older unfinished transaction
//! on the same database holds a conflicting lock: version-change
//! transactions conflict with everything, two readonly transactions never
//! conflict, anything else conflicts on overlapping scope. Because older
//! *pending* transactions count too, a waiting readwrite transaction is
//! never overtaken by later readers of the same stores.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::Durability;
use crate::database::Database;
use crate::error::{IdbError, Result};
use crate::event::{Event, EventTarget, EventType};
use crate::storage::{ObjectStoreData, StoreId};

use super::{
    ConnectionId, CursorId, Operation, Outcome, Owner, ReadyState, RequestId, RequestOrigin, Shared,
    State, Task, TransactionId,
};

/// Access mode of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
    VersionChange,
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for admission
    Pending,
    /// Admitted; requests run as they are queued
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TransactionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// Pre-transaction copies restored on abort
#[derive(Debug, Default)]
pub(crate) enum Rollback {
    #[default]
    None,
    /// Stores touched by a readwrite transaction, copied on first write
    Stores(HashMap<StoreId, ObjectStoreData>),
    /// The whole database, copied when an upgrade starts
    Database(Box<Database>),
}

#[derive(Debug)]
pub(crate) struct TransactionRecord {
    pub connection: ConnectionId,
    pub database: String,
    pub mode: TransactionMode,
    pub durability: Durability,
    pub scope: BTreeSet<StoreId>,
    /// Scope names in key order (readonly and readwrite only)
    pub scope_names: Vec<String>,
    pub state: TransactionState,
    /// Inside the active window
    pub active: bool,
    pub commit_requested: bool,
    /// A `ProcessTransaction` task is queued
    pub processing: bool,
    pub queue: VecDeque<RequestId>,
    pub requests: Vec<RequestId>,
    pub cursors: Vec<CursorId>,
    pub error: Option<IdbError>,
    pub rollback: Rollback,
    pub old_version: u64,
    /// Open request waiting on this upgrade transaction
    pub open_request: Option<RequestId>,
}

impl TransactionRecord {
    pub(crate) fn new(
        connection: ConnectionId,
        database: String,
        mode: TransactionMode,
        durability: Durability,
        scope: BTreeSet<StoreId>,
        scope_names: Vec<String>,
    ) -> Self {
        let rollback = match mode {
            TransactionMode::ReadWrite => Rollback::Stores(HashMap::new()),
            _ => Rollback::None,
        };
        Self {
            connection,
            database,
            mode,
            durability,
            scope,
            scope_names,
            state: TransactionState::Pending,
            active: true,
            commit_requested: false,
            processing: false,
            queue: VecDeque::new(),
            requests: Vec::new(),
            cursors: Vec::new(),
            error: None,
            rollback,
            old_version: 0,
            open_request: None,
        }
    }

    /// Whether new requests may be placed against the transaction
    pub(crate) fn is_active(&self) -> bool {
        self.active
            && matches!(self.state, TransactionState::Pending | TransactionState::Active)
    }

    fn conflicts_with(&self, other: &TransactionRecord) -> bool {
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        if self.mode == TransactionMode::ReadOnly && other.mode == TransactionMode::ReadOnly {
            return false;
        }
        !self.scope.is_disjoint(&other.scope)
    }
}

/// Mutable access to a store for a write, copying it first for rollback
pub(crate) fn store_for_write(
    state: &mut State,
    txn: TransactionId,
    store: StoreId,
) -> Result<&mut ObjectStoreData> {
    let State {
        databases,
        transactions,
        ..
    } = state;
    let record = transactions
        .get_mut(&txn)
        .ok_or_else(|| IdbError::InvalidState("unknown transaction".to_string()))?;
    let data = databases
        .get_mut(&record.database)
        .and_then(|db| db.store_mut(store))
        .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
    if let Rollback::Stores(copies) = &mut record.rollback {
        copies.entry(store).or_insert_with(|| data.clone());
    }
    Ok(data)
}

impl Shared {
    // =========================================================================
    // Creation and Admission
    // =========================================================================

    /// Register a new transaction and try to admit it
    pub(crate) fn create_transaction(&self, record: TransactionRecord) -> TransactionId {
        let (id, database) = {
            let mut state = self.state.borrow_mut();
            let id = state.next_transaction_id();
            let database = record.database.clone();
            if let Some(connection) = state.connections.get_mut(&record.connection) {
                connection.transactions.insert(id);
            }
            debug!(txn = id.0, mode = ?record.mode, scope = ?record.scope_names, "transaction created");
            state.transactions.insert(id, record);
            state.live.insert(id);
            (id, database)
        };
        self.deactivate_at_end_of_task(id);
        self.schedule(&database);
        id
    }

    /// Admit every pending transaction on `database` that nothing older blocks
    pub(crate) fn schedule(&self, database: &str) {
        let admitted: Vec<TransactionId> = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            let live: Vec<TransactionId> = state
                .live
                .iter()
                .copied()
                .filter(|id| state.transactions.get(id).is_some_and(|t| t.database == database))
                .collect();

            let mut admitted = Vec::new();
            for (i, id) in live.iter().enumerate() {
                let Some(candidate) = state.transactions.get(id) else {
                    continue;
                };
                if candidate.state != TransactionState::Pending {
                    continue;
                }
                let blocked = live[..i].iter().any(|older| {
                    state
                        .transactions
                        .get(older)
                        .is_some_and(|o| o.conflicts_with(candidate))
                });
                if !blocked {
                    admitted.push(*id);
                }
            }
            for id in &admitted {
                if let Some(record) = state.transactions.get_mut(id) {
                    record.state = TransactionState::Active;
                }
            }
            admitted
        };

        for id in admitted {
            debug!(txn = id.0, "transaction admitted");
            self.kick(id);
        }
    }

    /// Queue request processing if work is waiting, otherwise try to commit
    fn kick(&self, txn: TransactionId) {
        let start = {
            let mut state = self.state.borrow_mut();
            match state.transactions.get_mut(&txn) {
                Some(record)
                    if record.state == TransactionState::Active
                        && !record.processing
                        && !record.queue.is_empty() =>
                {
                    record.processing = true;
                    true
                }
                _ => false,
            }
        };
        if start {
            self.queue_task(Task::ProcessTransaction(txn));
        } else {
            self.maybe_commit(txn);
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Place a new request at the back of a transaction's queue
    pub(crate) fn submit(
        &self,
        txn: TransactionId,
        source: RequestOrigin,
        operation: Operation,
    ) -> RequestId {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_request_id();
            state
                .requests
                .insert(id, super::RequestRecord::new(Some(txn), source, operation));
            if let Some(record) = state.transactions.get_mut(&txn) {
                record.requests.push(id);
                record.queue.push_back(id);
            }
            id
        };
        trace!(txn = txn.0, request = id.0, "request queued");
        self.kick(txn);
        id
    }

    /// Queue an existing request again (cursor iteration)
    pub(crate) fn resubmit(&self, txn: TransactionId, request: RequestId, operation: Operation) {
        {
            let mut state = self.state.borrow_mut();
            if let Some(record) = state.requests.get_mut(&request) {
                record.ready = ReadyState::Pending;
                record.outcome = Outcome::Undefined;
                record.error = None;
                record.operation = Some(operation);
            }
            if let Some(record) = state.transactions.get_mut(&txn) {
                record.queue.push_back(request);
            }
        }
        trace!(txn = txn.0, request = request.0, "request requeued");
        self.kick(txn);
    }

    /// Run the request at the head of the queue and fire its event
    pub(crate) fn process_transaction(&self, txn: TransactionId) {
        // Step 1: Take the next request
        let next = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(record) = state.transactions.get_mut(&txn) else {
                return;
            };
            record.processing = false;
            if record.state != TransactionState::Active {
                return;
            }
            let connection = record.connection;
            let popped = record.queue.pop_front();
            popped.map(|request| {
                let operation = state
                    .requests
                    .get_mut(&request)
                    .and_then(|r| r.operation.take());
                (request, operation, connection)
            })
        };
        let Some((request, operation, connection)) = next else {
            self.maybe_commit(txn);
            return;
        };

        // Step 2: Execute against the store
        let outcome = match operation {
            Some(operation) => self.execute(txn, operation),
            None => Ok(Outcome::Undefined),
        };
        trace!(txn = txn.0, request = request.0, ok = outcome.is_ok(), "request executed");

        // Step 3: Record the result
        let is_error = outcome.is_err();
        {
            let mut state = self.state.borrow_mut();
            if let Some(record) = state.requests.get_mut(&request) {
                record.ready = ReadyState::Done;
                match outcome {
                    Ok(outcome) => {
                        record.outcome = outcome;
                        record.error = None;
                    }
                    Err(error) => {
                        record.outcome = Outcome::Undefined;
                        record.error = Some(error);
                    }
                }
            }
        }

        // Step 4: Fire the event inside the active window
        let mut event = if is_error {
            Event::new(EventType::Error, EventTarget::Request(request), true, true)
        } else {
            Event::new(EventType::Success, EventTarget::Request(request), false, false)
        };
        self.set_active(txn, true);
        let listener_failed = self.fire(
            &mut event,
            &[EventTarget::Connection(connection), EventTarget::Transaction(txn)],
        );
        self.set_active(txn, false);

        // Step 5: Unhandled failures abort the transaction
        let still_running = self
            .state
            .borrow()
            .transactions
            .get(&txn)
            .is_some_and(|t| t.state == TransactionState::Active);
        if still_running {
            if listener_failed {
                self.abort_transaction(
                    txn,
                    Some(IdbError::Abort("an event listener failed".to_string())),
                );
            } else if is_error && !event.default_prevented() {
                let error = self
                    .state
                    .borrow()
                    .requests
                    .get(&request)
                    .and_then(|r| r.error.clone());
                self.abort_transaction(txn, error);
            }
        }

        // Step 6: Continue with the queue
        self.kick(txn);
    }

    /// Open or close the active window around an event dispatch.
    ///
    /// A transaction that asked to commit never reopens its window.
    fn set_active(&self, txn: TransactionId, active: bool) {
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.transactions.get_mut(&txn) {
            let running = matches!(record.state, TransactionState::Active | TransactionState::Pending);
            if running && !(active && record.commit_requested) {
                record.active = active;
            }
        }
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Explicit commit: stop accepting requests and commit once drained
    pub(crate) fn request_commit(&self, txn: TransactionId) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            let record = state.transaction_mut(txn)?;
            if !record.is_active() {
                return Err(IdbError::InvalidState(
                    "transaction is not active".to_string(),
                ));
            }
            record.commit_requested = true;
            record.active = false;
        }
        self.maybe_commit(txn);
        Ok(())
    }

    /// Start committing once the transaction is admitted, outside its
    /// active window and out of requests
    pub(crate) fn maybe_commit(&self, txn: TransactionId) {
        let commit = {
            let mut state = self.state.borrow_mut();
            match state.transactions.get_mut(&txn) {
                Some(record)
                    if record.state == TransactionState::Active
                        && !record.active
                        && !record.processing
                        && record.queue.is_empty() =>
                {
                    record.state = TransactionState::Committing;
                    true
                }
                _ => false,
            }
        };
        if commit {
            debug!(txn = txn.0, "transaction committing");
            self.queue_task(Task::FinishCommit(txn));
        }
    }

    pub(crate) fn finish_commit(&self, txn: TransactionId) {
        let details = {
            let mut state = self.state.borrow_mut();
            match state.transactions.get_mut(&txn) {
                Some(record) if record.state == TransactionState::Committing => {
                    record.state = TransactionState::Committed;
                    record.rollback = Rollback::None;
                    Some((record.connection, record.open_request))
                }
                _ => None,
            }
        };
        let Some((connection, open_request)) = details else {
            return;
        };
        debug!(txn = txn.0, "transaction committed");

        let mut event = Event::new(EventType::Complete, EventTarget::Transaction(txn), false, false);
        self.fire(&mut event, &[EventTarget::Connection(connection)]);

        self.finish_transaction(txn);
        if let Some(request) = open_request {
            self.finish_upgrade(request, connection, true);
        }
    }

    // =========================================================================
    // Abort
    // =========================================================================

    /// Abort synchronously: roll back, fail queued requests, and queue the
    /// events. A transaction whose commit is still queued can be aborted;
    /// one already finishing cannot.
    pub(crate) fn abort_transaction(&self, txn: TransactionId, error: Option<IdbError>) {
        let aborted = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(record) = state.transactions.get_mut(&txn) else {
                return;
            };
            if !matches!(
                record.state,
                TransactionState::Pending | TransactionState::Active | TransactionState::Committing
            ) {
                return;
            }
            record.state = TransactionState::Aborting;
            record.active = false;
            record.error = error;

            // Step 1: Restore the pre-transaction contents
            match std::mem::take(&mut record.rollback) {
                Rollback::None => {}
                Rollback::Stores(copies) => {
                    if let Some(db) = state.databases.get_mut(&record.database) {
                        for (id, data) in copies {
                            db.stores.insert(id, data);
                        }
                    }
                }
                Rollback::Database(snapshot) => {
                    if let Some(connection) = state.connections.get_mut(&record.connection) {
                        connection.version = record.old_version;
                    }
                    state.databases.insert(record.database.clone(), *snapshot);
                }
            }

            // Step 2: Fail everything still queued
            let drained: Vec<RequestId> = record.queue.drain(..).collect();
            for id in &drained {
                if let Some(request) = state.requests.get_mut(id) {
                    request.ready = ReadyState::Done;
                    request.outcome = Outcome::Undefined;
                    request.error = Some(IdbError::Abort("transaction was aborted".to_string()));
                    request.operation = None;
                }
            }
            drained
        };
        debug!(txn = txn.0, pending = aborted.len(), "transaction aborting");
        self.queue_task(Task::FinishAbort(txn, aborted));
    }

    pub(crate) fn finish_abort(&self, txn: TransactionId, aborted: Vec<RequestId>) {
        let details = {
            let mut state = self.state.borrow_mut();
            match state.transactions.get_mut(&txn) {
                Some(record) if record.state == TransactionState::Aborting => {
                    record.state = TransactionState::Aborted;
                    Some((record.connection, record.open_request))
                }
                _ => None,
            }
        };
        let Some((connection, open_request)) = details else {
            return;
        };
        debug!(txn = txn.0, "transaction aborted");

        let parents = [EventTarget::Connection(connection), EventTarget::Transaction(txn)];
        for request in aborted {
            let mut event = Event::new(EventType::Error, EventTarget::Request(request), true, true);
            self.fire(&mut event, &parents);
        }
        let mut event = Event::new(EventType::Abort, EventTarget::Transaction(txn), true, false);
        self.fire(&mut event, &parents[..1]);

        self.finish_transaction(txn);
        if let Some(request) = open_request {
            self.finish_upgrade(request, connection, false);
        }
    }

    /// Abort requested through the public API
    pub(crate) fn abort_by_caller(&self, txn: TransactionId) -> Result<()> {
        {
            let state = self.state.borrow();
            let record = state.transaction(txn)?;
            if !matches!(record.state, TransactionState::Pending | TransactionState::Active) {
                return Err(IdbError::InvalidState(
                    "transaction is committing or finished".to_string(),
                ));
            }
        }
        self.abort_transaction(txn, None);
        Ok(())
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Release the scope, admit waiting transactions, drop listeners
    fn finish_transaction(&self, txn: TransactionId) {
        let released = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            state.live.remove(&txn);
            match state.transactions.get_mut(&txn) {
                Some(record) => {
                    record.queue.clear();
                    record.rollback = Rollback::None;
                    if let Some(connection) = state.connections.get_mut(&record.connection) {
                        connection.transactions.remove(&txn);
                        if connection.upgrade == Some(txn) {
                            connection.upgrade = None;
                        }
                    }
                    Some((
                        record.database.clone(),
                        record.connection,
                        record.requests.clone(),
                    ))
                }
                None => None,
            }
        };
        let Some((database, connection, requests)) = released else {
            return;
        };

        let mut targets: Vec<EventTarget> = requests.into_iter().map(EventTarget::Request).collect();
        targets.push(EventTarget::Transaction(txn));
        self.purge_listeners(&targets);
        self.release(Owner::Transaction(txn));

        self.schedule(&database);
        self.maybe_close_connection(connection);
    }
}
