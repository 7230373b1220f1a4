//! Engine Module
//!
//! The core that coordinates databases, transactions, requests and
//! cursors on a single-threaded event loop.
//!
//! ## Responsibilities
//! - Own every database and every connection, transaction, request and
//!   cursor record (handles only carry ids and a lease)
//! - Admit transactions by scope and mode, commit and roll them back
//! - Execute queued requests one task at a time and dispatch their events
//! - Run the open/delete queue of each database name
//!
//! ## Execution Model
//! ```text
//!   run_until_idle
//!     └─ end of task: microtasks → deactivate → auto-commit
//!     └─ loop over tasks
//!          ├─ ProcessTransaction   run one request, fire success/error
//!          ├─ FinishCommit         fire complete, release the scope
//!          ├─ FinishAbort          fire error per request, then abort
//!          ├─ AbortTransaction     abort raised from outside a request
//!          ├─ PumpOpenQueue        advance the head open/delete request
//!          └─ Callback             embedder work
//!        each task followed by the end-of-task step
//! ```
//!
//! No `RefCell` borrow is held while a listener or callback runs.
//!
//! ## Record Release
//! Records are grouped by [`Owner`]: a transaction with its requests and
//! cursors, or one open/delete request. Every handle into a group holds
//! that group's [`Lease`]. Once the owner has finished and the last lease
//! is dropped, the end-of-task step removes the group's records.

mod cursor;
mod event_loop;
mod lifecycle;
mod operation;
mod request;
mod transaction;

pub use cursor::CursorDirection;
pub use request::ReadyState;
pub use transaction::{TransactionMode, TransactionState};

pub(crate) use cursor::CursorRecord;
pub(crate) use event_loop::{EventLoop, Task};
pub(crate) use lifecycle::ConnectionRecord;
pub(crate) use operation::{Operation, Source, Want};
pub(crate) use request::{Outcome, RequestRecord, RequestOrigin};
pub(crate) use transaction::TransactionRecord;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::config::Config;
use crate::database::Database;
use crate::error::{IdbError, Result};
use crate::event::{self, Event, EventTarget, ListenerTable};
use crate::storage::{ObjectStoreData, StoreId};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifies a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u64);

/// Identifies a transaction; ids grow in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub(crate) u64);

/// Identifies a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub(crate) u64);

/// Identifies a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorId(pub(crate) u64);

/// A group of records released together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Owner {
    /// The transaction, its requests and its cursors
    Transaction(TransactionId),
    /// An open or delete request
    OpenRequest(RequestId),
}

// =============================================================================
// Leases
// =============================================================================

/// Keeps an owner's records alive while any handle refers to them
pub(crate) struct Lease {
    owner: Owner,
    shared: Weak<Shared>,
}

impl Lease {
    pub(crate) fn owner(&self) -> Owner {
        self.owner
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release(self.owner);
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// Everything a registry and its handles share
pub(crate) struct Shared {
    pub config: Config,
    pub state: RefCell<State>,
    pub listeners: RefCell<ListenerTable>,
    pub event_loop: RefCell<EventLoop>,
    leases: RefCell<HashMap<Owner, Weak<Lease>>>,
    /// Owners whose records may have become releasable
    released: RefCell<Vec<Owner>>,
}

/// Records owned by the engine
#[derive(Default)]
pub(crate) struct State {
    pub databases: HashMap<String, Database>,
    pub connections: HashMap<ConnectionId, ConnectionRecord>,
    pub transactions: BTreeMap<TransactionId, TransactionRecord>,
    /// Transactions that have not finished, in creation order
    pub live: BTreeSet<TransactionId>,
    pub requests: HashMap<RequestId, RequestRecord>,
    pub cursors: HashMap<CursorId, CursorRecord>,
    /// Pending open and delete requests per database name
    pub open_queues: HashMap<String, VecDeque<RequestId>>,
    next_id: u64,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn next_connection_id(&mut self) -> ConnectionId {
        ConnectionId(self.next())
    }

    pub fn next_transaction_id(&mut self) -> TransactionId {
        TransactionId(self.next())
    }

    pub fn next_request_id(&mut self) -> RequestId {
        RequestId(self.next())
    }

    pub fn next_cursor_id(&mut self) -> CursorId {
        CursorId(self.next())
    }

    pub fn transaction(&self, id: TransactionId) -> Result<&TransactionRecord> {
        self.transactions
            .get(&id)
            .ok_or_else(|| IdbError::InvalidState("unknown transaction".to_string()))
    }

    pub fn transaction_mut(&mut self, id: TransactionId) -> Result<&mut TransactionRecord> {
        self.transactions
            .get_mut(&id)
            .ok_or_else(|| IdbError::InvalidState("unknown transaction".to_string()))
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&ConnectionRecord> {
        self.connections
            .get(&id)
            .ok_or_else(|| IdbError::InvalidState("unknown connection".to_string()))
    }

    pub fn cursor(&self, id: CursorId) -> Result<&CursorRecord> {
        self.cursors
            .get(&id)
            .ok_or_else(|| IdbError::InvalidState("unknown cursor".to_string()))
    }

    /// Database a transaction runs against
    pub fn database_of(&self, txn: TransactionId) -> Option<&Database> {
        let record = self.transactions.get(&txn)?;
        self.databases.get(&record.database)
    }

    pub fn database_of_mut(&mut self, txn: TransactionId) -> Option<&mut Database> {
        let record = self.transactions.get(&txn)?;
        self.databases.get_mut(&record.database)
    }

    /// A store as seen from a transaction; `None` once deleted
    pub fn store(&self, txn: TransactionId, store: StoreId) -> Option<&ObjectStoreData> {
        self.database_of(txn)?.store(store)
    }

    /// Remove an owner's records if it has finished. Returns whether it did.
    fn remove_finished(&mut self, owner: Owner) -> bool {
        match owner {
            Owner::Transaction(txn) => {
                let finished = !self.live.contains(&txn)
                    && self
                        .transactions
                        .get(&txn)
                        .is_some_and(|t| t.state.is_finished());
                if !finished {
                    return false;
                }
                if let Some(record) = self.transactions.remove(&txn) {
                    for id in &record.requests {
                        self.requests.remove(id);
                    }
                    for id in &record.cursors {
                        self.cursors.remove(id);
                    }
                }
                true
            }
            Owner::OpenRequest(id) => {
                let finished = self
                    .requests
                    .get(&id)
                    .and_then(|r| r.open.as_ref())
                    .is_some_and(|open| open.phase == request::OpenPhase::Finished);
                if finished {
                    self.requests.remove(&id);
                }
                finished
            }
        }
    }
}

impl Shared {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            state: RefCell::new(State::default()),
            listeners: RefCell::new(ListenerTable::default()),
            event_loop: RefCell::new(EventLoop::default()),
            leases: RefCell::new(HashMap::new()),
            released: RefCell::new(Vec::new()),
        }
    }

    /// The lease on `owner`'s records, shared with every live handle
    pub(crate) fn lease(self: &Rc<Self>, owner: Owner) -> Rc<Lease> {
        let mut leases = self.leases.borrow_mut();
        if let Some(lease) = leases.get(&owner).and_then(|weak| weak.upgrade()) {
            return lease;
        }
        let lease = Rc::new(Lease {
            owner,
            shared: Rc::downgrade(self),
        });
        leases.insert(owner, Rc::downgrade(&lease));
        lease
    }

    /// Note that `owner` may be releasable; checked at the end of the task
    pub(crate) fn release(&self, owner: Owner) {
        if let Ok(mut released) = self.released.try_borrow_mut() {
            released.push(owner);
        }
    }

    /// Drop the records of finished owners that no handle refers to
    pub(crate) fn collect_released(&self) {
        let candidates = std::mem::take(&mut *self.released.borrow_mut());
        if candidates.is_empty() {
            return;
        }
        let mut leases = self.leases.borrow_mut();
        let mut state = self.state.borrow_mut();
        for owner in candidates {
            if leases.get(&owner).is_some_and(|weak| weak.strong_count() > 0) {
                continue;
            }
            if state.remove_finished(owner) {
                leases.remove(&owner);
                trace!(?owner, "records released");
            }
        }
    }

    /// Dispatch an event, checkpointing microtasks after each listener.
    ///
    /// Returns `true` when a listener failed.
    pub(crate) fn fire(&self, event: &mut Event, parents: &[EventTarget]) -> bool {
        event::dispatch(&self.listeners, event, parents, &mut || {
            self.perform_microtask_checkpoint()
        })
    }

    /// Drop the listeners of targets that can never receive events again
    pub(crate) fn purge_listeners(&self, targets: &[EventTarget]) {
        let released: Vec<_> = {
            let mut listeners = self.listeners.borrow_mut();
            targets.iter().flat_map(|t| listeners.purge(*t)).collect()
        };
        drop(released);
    }

    /// Release every listener and queued callback
    pub(crate) fn shutdown(&self) {
        let listeners = self.listeners.borrow_mut().take_all();
        let pending = self.event_loop.borrow_mut().take_all();
        drop(listeners);
        drop(pending);
    }
}
