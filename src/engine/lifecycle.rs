//! Open and delete processing
//!
//! Opens and deletes for one database name run strictly one after another
//! from a per-name queue. The head request advances through
//! `Queued → Blocked → Upgrading → Finished`; it is re-examined (pumped)
//! whenever a connection to its database closes.
//!
//! ```text
//!   open(v)  v < current   → VersionError
//!            v == current  → success(connection)
//!            v > current   → versionchange at others, blocked if needed,
//!                            wait for close, upgradeneeded, then success
//!                            or AbortError depending on the upgrade
//!   delete                 → versionchange at others, blocked if needed,
//!                            wait for close, remove, success
//! ```

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::database::Database;
use crate::error::{IdbError, Result};
use crate::event::{Event, EventTarget, EventType};

use super::request::{OpenAction, OpenPhase};
use super::transaction::Rollback;
use super::{
    ConnectionId, Outcome, Owner, RequestId, RequestRecord, Shared, Task, TransactionMode,
    TransactionRecord, TransactionState,
};

#[derive(Debug, Clone)]
pub(crate) struct ConnectionRecord {
    pub database: String,
    pub version: u64,
    pub close_pending: bool,
    pub closed: bool,
    /// Unfinished transactions created on this connection
    pub transactions: BTreeSet<super::TransactionId>,
    pub upgrade: Option<super::TransactionId>,
}

impl ConnectionRecord {
    fn new(database: &str, version: u64) -> Self {
        Self {
            database: database.to_string(),
            version,
            close_pending: false,
            closed: false,
            transactions: BTreeSet::new(),
            upgrade: None,
        }
    }
}

impl Shared {
    // =========================================================================
    // Queue
    // =========================================================================

    pub(crate) fn open_database(&self, name: &str, version: Option<u64>) -> Result<RequestId> {
        if version == Some(0) {
            return Err(IdbError::Type("version must be at least 1".to_string()));
        }
        Ok(self.enqueue_open(name, OpenAction::Open { version }))
    }

    pub(crate) fn delete_database(&self, name: &str) -> RequestId {
        self.enqueue_open(name, OpenAction::Delete)
    }

    fn enqueue_open(&self, name: &str, action: OpenAction) -> RequestId {
        let (id, first) = {
            let mut state = self.state.borrow_mut();
            let id = state.next_request_id();
            state.requests.insert(id, RequestRecord::open(name, action));
            let queue = state.open_queues.entry(name.to_string()).or_insert_with(VecDeque::new);
            queue.push_back(id);
            (id, queue.len() == 1)
        };
        debug!(database = name, request = id.0, ?action, "open request queued");
        if first {
            self.queue_task(Task::PumpOpenQueue(name.to_string()));
        }
        id
    }

    /// Advance the request at the head of `name`'s queue
    pub(crate) fn pump_open_queue(&self, name: &str) {
        let head = {
            let state = self.state.borrow();
            state
                .open_queues
                .get(name)
                .and_then(|queue| queue.front().copied())
                .and_then(|id| {
                    let open = state.requests.get(&id)?.open.clone()?;
                    Some((id, open))
                })
        };
        let Some((request, open)) = head else {
            return;
        };
        match open.phase {
            OpenPhase::Queued => match open.action {
                OpenAction::Open { version } => self.begin_open(request, name, version),
                OpenAction::Delete => self.begin_delete(request, name),
            },
            OpenPhase::Blocked {
                old_version,
                new_version,
            } => self.proceed_if_unblocked(request, name, old_version, new_version),
            OpenPhase::Upgrading | OpenPhase::Finished => {}
        }
    }

    fn set_phase(&self, request: RequestId, phase: OpenPhase) {
        let mut state = self.state.borrow_mut();
        if let Some(open) = state.requests.get_mut(&request).and_then(|r| r.open.as_mut()) {
            open.phase = phase;
        }
    }

    /// Retire the head request and let the next one run
    fn finish_open_request(&self, request: RequestId) {
        let name = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(open) = state.requests.get_mut(&request).and_then(|r| r.open.as_mut()) else {
                return;
            };
            open.phase = OpenPhase::Finished;
            let name = open.database.clone();
            let more = match state.open_queues.get_mut(&name) {
                Some(queue) => {
                    if queue.front() == Some(&request) {
                        queue.pop_front();
                    }
                    !queue.is_empty()
                }
                None => false,
            };
            if !more {
                state.open_queues.remove(&name);
            }
            more.then_some(name)
        };
        self.purge_listeners(&[EventTarget::Request(request)]);
        self.release(Owner::OpenRequest(request));
        if let Some(name) = name {
            self.queue_task(Task::PumpOpenQueue(name));
        }
    }

    /// Fire an open request's final event; open requests have no ancestors
    fn complete_open_request(&self, request: RequestId, outcome: Result<Outcome>, versions: Option<(u64, Option<u64>)>) {
        let is_error = outcome.is_err();
        {
            let mut state = self.state.borrow_mut();
            if let Some(record) = state.requests.get_mut(&request) {
                record.transaction = None;
                match outcome {
                    Ok(outcome) => record.succeed(outcome),
                    Err(error) => record.fail(error),
                }
            }
        }
        let target = EventTarget::Request(request);
        let mut event = if is_error {
            Event::new(EventType::Error, target, true, true)
        } else {
            Event::new(EventType::Success, target, false, false)
        };
        if let Some((old, new)) = versions {
            event = event.with_versions(old, new);
        }
        self.fire(&mut event, &[]);
        self.finish_open_request(request);
    }

    // =========================================================================
    // Open
    // =========================================================================

    fn begin_open(&self, request: RequestId, name: &str, version: Option<u64>) {
        let (old_version, requested) = {
            let mut state = self.state.borrow_mut();
            let db = state
                .databases
                .entry(name.to_string())
                .or_insert_with(|| Database::new(name));
            let old = db.version;
            (old, version.unwrap_or(if old == 0 { 1 } else { old }))
        };
        debug!(database = name, old_version, requested, "opening database");

        if requested < old_version {
            let error = IdbError::Version(format!(
                "requested version {} is less than the current version {}",
                requested, old_version
            ));
            self.complete_open_request(request, Err(error), None);
        } else if requested == old_version {
            let connection = self.new_connection(name, old_version);
            self.complete_open_request(request, Ok(Outcome::Connection(connection)), None);
        } else {
            self.set_phase(
                request,
                OpenPhase::Blocked {
                    old_version,
                    new_version: Some(requested),
                },
            );
            self.notify_version_change(request, name, old_version, Some(requested));
            self.proceed_if_unblocked(request, name, old_version, Some(requested));
        }
    }

    fn new_connection(&self, name: &str, version: u64) -> ConnectionId {
        let mut state = self.state.borrow_mut();
        let id = state.next_connection_id();
        state.connections.insert(id, ConnectionRecord::new(name, version));
        debug!(database = name, connection = id.0, version, "connection opened");
        id
    }

    /// Fire `versionchange` at the other connections, then `blocked` at
    /// the request if any of them is still open
    fn notify_version_change(&self, request: RequestId, name: &str, old: u64, new: Option<u64>) {
        let others = self.open_connections(name);
        for connection in &others {
            let still_open = self
                .state
                .borrow()
                .connections
                .get(connection)
                .is_some_and(|c| !c.close_pending);
            if still_open {
                let mut event = Event::new(
                    EventType::VersionChange,
                    EventTarget::Connection(*connection),
                    false,
                    false,
                )
                .with_versions(old, new);
                self.fire(&mut event, &[]);
            }
        }
        if !self.open_connections(name).is_empty() {
            debug!(database = name, request = request.0, "open request blocked");
            let mut event = Event::new(EventType::Blocked, EventTarget::Request(request), false, false)
                .with_versions(old, new);
            self.fire(&mut event, &[]);
        }
    }

    /// Connections to `name` that have not started closing
    fn open_connections(&self, name: &str) -> Vec<ConnectionId> {
        let state = self.state.borrow();
        let mut ids: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, c)| c.database == name && !c.close_pending)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn proceed_if_unblocked(&self, request: RequestId, name: &str, old: u64, new: Option<u64>) {
        let waiting = self
            .state
            .borrow()
            .connections
            .values()
            .any(|c| c.database == name && !c.closed);
        if waiting {
            return;
        }
        match new {
            Some(new) => self.run_upgrade(request, name, old, new),
            None => self.finish_delete(request, name, old),
        }
    }

    /// Start the version-change transaction and fire `upgradeneeded`
    fn run_upgrade(&self, request: RequestId, name: &str, old: u64, new: u64) {
        let connection = self.new_connection(name, new);

        // Step 1: Snapshot the database and move it to the new version
        let setup = {
            let mut state = self.state.borrow_mut();
            state.databases.get_mut(name).map(|db| {
                let snapshot = db.clone();
                db.version = new;
                (snapshot, db.all_store_ids().collect::<BTreeSet<_>>())
            })
        };
        let Some((snapshot, scope)) = setup else {
            self.complete_open_request(
                request,
                Err(IdbError::Abort("database disappeared before upgrade".to_string())),
                None,
            );
            return;
        };

        // Step 2: Create the upgrade transaction, admitted immediately
        let mut record = TransactionRecord::new(
            connection,
            name.to_string(),
            TransactionMode::VersionChange,
            self.config.default_durability,
            scope,
            Vec::new(),
        );
        record.state = TransactionState::Active;
        record.rollback = Rollback::Database(Box::new(snapshot));
        record.old_version = old;
        record.open_request = Some(request);
        let txn = self.create_transaction(record);

        {
            let mut state = self.state.borrow_mut();
            if let Some(c) = state.connections.get_mut(&connection) {
                c.upgrade = Some(txn);
            }
            if let Some(r) = state.requests.get_mut(&request) {
                r.succeed(Outcome::Connection(connection));
                r.transaction = Some(txn);
            }
        }
        self.set_phase(request, OpenPhase::Upgrading);
        debug!(database = name, old, new, txn = txn.0, "upgrade started");

        // Step 3: Fire upgradeneeded inside the active window
        let mut event = Event::new(EventType::UpgradeNeeded, EventTarget::Request(request), false, false)
            .with_versions(old, Some(new));
        let failed = self.fire(&mut event, &[]);
        let still_running = {
            let mut state = self.state.borrow_mut();
            match state.transactions.get_mut(&txn) {
                Some(t) if t.state == TransactionState::Active => {
                    t.active = false;
                    true
                }
                _ => false,
            }
        };
        if failed && still_running {
            self.abort_transaction(
                txn,
                Some(IdbError::Abort("upgradeneeded listener failed".to_string())),
            );
        }
        self.maybe_commit(txn);
    }

    /// Deliver the open result once the upgrade transaction has finished
    pub(crate) fn finish_upgrade(&self, request: RequestId, connection: ConnectionId, committed: bool) {
        let (outcome, remove_database) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let record = state.connections.get_mut(&connection);
            let close_pending = record.as_ref().map_or(true, |c| c.close_pending);
            if committed && !close_pending {
                (Ok(Outcome::Connection(connection)), None)
            } else {
                let database = record.map(|c| {
                    c.close_pending = true;
                    c.database.clone()
                });
                // A database created by this open does not survive its abort
                let remove = database.filter(|name| {
                    !committed && state.databases.get(name).is_some_and(|db| db.version == 0)
                });
                (
                    Err(IdbError::Abort("version change transaction was aborted".to_string())),
                    remove,
                )
            }
        };
        if let Some(name) = remove_database {
            debug!(database = %name, "removing database created by aborted upgrade");
            self.state.borrow_mut().databases.remove(&name);
        }
        self.maybe_close_connection(connection);
        self.complete_open_request(request, outcome, None);
    }

    // =========================================================================
    // Delete
    // =========================================================================

    fn begin_delete(&self, request: RequestId, name: &str) {
        let old_version = self.state.borrow().databases.get(name).map(|db| db.version);
        let Some(old_version) = old_version else {
            debug!(database = name, "deleting missing database");
            self.complete_open_request(request, Ok(Outcome::Undefined), Some((0, None)));
            return;
        };
        self.set_phase(
            request,
            OpenPhase::Blocked {
                old_version,
                new_version: None,
            },
        );
        self.notify_version_change(request, name, old_version, None);
        self.proceed_if_unblocked(request, name, old_version, None);
    }

    fn finish_delete(&self, request: RequestId, name: &str, old_version: u64) {
        self.state.borrow_mut().databases.remove(name);
        debug!(database = name, old_version, "database deleted");
        self.complete_open_request(request, Ok(Outcome::Undefined), Some((old_version, None)));
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Mark a connection close-pending; it closes once its transactions end
    pub(crate) fn close_connection(&self, connection: ConnectionId) {
        if let Some(record) = self.state.borrow_mut().connections.get_mut(&connection) {
            record.close_pending = true;
        }
        self.maybe_close_connection(connection);
    }

    pub(crate) fn maybe_close_connection(&self, connection: ConnectionId) {
        let closed = {
            let mut state = self.state.borrow_mut();
            match state.connections.get_mut(&connection) {
                Some(c) if c.close_pending && !c.closed && c.transactions.is_empty() => {
                    c.closed = true;
                    Some(c.database.clone())
                }
                _ => None,
            }
        };
        if let Some(name) = closed {
            debug!(database = %name, connection = connection.0, "connection closed");
            self.purge_listeners(&[EventTarget::Connection(connection)]);
            self.queue_task(Task::PumpOpenQueue(name));
        }
    }
}
