//! Requests and their results

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::engine::{Lease, Outcome, Owner, ReadyState, RequestId, RequestOrigin, Shared};
use crate::error::{IdbError, Result};
use crate::event::{EventSource, EventTarget, ListenerTable};
use crate::key::Key;
use crate::value::Value;

use super::{Connection, Cursor, Index, ObjectStore, Transaction};

/// Result of a completed request
#[derive(Debug, Clone)]
pub enum RequestResult {
    Undefined,
    /// A cursor ran off the end of its range
    Null,
    Value(Value),
    Key(Key),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Cursor),
    Connection(Connection),
}

impl RequestResult {
    pub fn is_undefined(&self) -> bool {
        matches!(self, RequestResult::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RequestResult::Null)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            RequestResult::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            RequestResult::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&[Value]> {
        match self {
            RequestResult::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn keys(&self) -> Option<&[Key]> {
        match self {
            RequestResult::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            RequestResult::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match self {
            RequestResult::Cursor(cursor) => Some(cursor.clone()),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<Connection> {
        match self {
            RequestResult::Connection(connection) => Some(connection.clone()),
            _ => None,
        }
    }
}

/// What a request was placed against
#[derive(Debug, Clone)]
pub enum RequestSource {
    None,
    ObjectStore(ObjectStore),
    Index(Index),
    Cursor(Cursor),
}

/// Completion slot of one operation
#[derive(Clone)]
pub struct Request {
    shared: Rc<Shared>,
    id: RequestId,
    lease: Rc<Lease>,
}

impl Request {
    pub(crate) fn new(shared: Rc<Shared>, id: RequestId, lease: Rc<Lease>) -> Self {
        Self { shared, id, lease }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared
            .state
            .borrow()
            .requests
            .get(&self.id)
            .map_or(ReadyState::Pending, |r| r.ready)
    }

    /// The result; InvalidStateError while the request is pending
    pub fn result(&self) -> Result<RequestResult> {
        let outcome = {
            let state = self.shared.state.borrow();
            let record = state
                .requests
                .get(&self.id)
                .ok_or_else(|| IdbError::InvalidState("unknown request".to_string()))?;
            if record.ready == ReadyState::Pending {
                return Err(IdbError::InvalidState("request is still pending".to_string()));
            }
            record.outcome.clone()
        };
        Ok(match outcome {
            Outcome::Undefined => RequestResult::Undefined,
            Outcome::Null => RequestResult::Null,
            Outcome::Value(value) => RequestResult::Value(value),
            Outcome::Key(key) => RequestResult::Key(key),
            Outcome::Values(values) => RequestResult::Values(values),
            Outcome::Keys(keys) => RequestResult::Keys(keys),
            Outcome::Count(n) => RequestResult::Count(n),
            Outcome::Cursor(id) => RequestResult::Cursor(Cursor::new(
                Rc::clone(&self.shared),
                id,
                Rc::clone(&self.lease),
            )),
            Outcome::Connection(id) => {
                RequestResult::Connection(Connection::new(Rc::clone(&self.shared), id))
            }
        })
    }

    /// The error; InvalidStateError while the request is pending
    pub fn error(&self) -> Result<Option<IdbError>> {
        let state = self.shared.state.borrow();
        let record = state
            .requests
            .get(&self.id)
            .ok_or_else(|| IdbError::InvalidState("unknown request".to_string()))?;
        if record.ready == ReadyState::Pending {
            return Err(IdbError::InvalidState("request is still pending".to_string()));
        }
        Ok(record.error.clone())
    }

    pub fn transaction(&self) -> Option<Transaction> {
        let txn = self.shared.state.borrow().requests.get(&self.id)?.transaction?;
        // An open request reaches its upgrade transaction, a separate owner
        let lease = match self.lease.owner() {
            Owner::Transaction(owner) if owner == txn => Rc::clone(&self.lease),
            _ => self.shared.lease(Owner::Transaction(txn)),
        };
        Some(Transaction::new(Rc::clone(&self.shared), txn, lease))
    }

    pub fn source(&self) -> RequestSource {
        let (origin, txn) = {
            let state = self.shared.state.borrow();
            match state.requests.get(&self.id) {
                Some(record) => (record.source, record.transaction),
                None => return RequestSource::None,
            }
        };
        let (shared, lease) = (Rc::clone(&self.shared), Rc::clone(&self.lease));
        match (origin, txn) {
            (RequestOrigin::Store(store), Some(txn)) => {
                RequestSource::ObjectStore(ObjectStore::new(shared, txn, store, lease))
            }
            (RequestOrigin::Index(store, index), Some(txn)) => {
                RequestSource::Index(Index::new(shared, txn, store, index, lease))
            }
            (RequestOrigin::Cursor(cursor), _) => {
                RequestSource::Cursor(Cursor::new(shared, cursor, lease))
            }
            _ => RequestSource::None,
        }
    }
}

impl EventSource for Request {
    fn event_target(&self) -> EventTarget {
        EventTarget::Request(self.id)
    }

    fn listener_table(&self) -> &RefCell<ListenerTable> {
        &self.shared.listeners
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").field("id", &self.id).finish()
    }
}

/// Request returned by `open` and `delete_database`.
///
/// Besides `success` and `error` it receives `blocked` and, for opens,
/// `upgradeneeded`.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    request: Request,
}

impl OpenRequest {
    pub(crate) fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn id(&self) -> RequestId {
        self.request.id()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.request.ready_state()
    }

    pub fn result(&self) -> Result<RequestResult> {
        self.request.result()
    }

    pub fn error(&self) -> Result<Option<IdbError>> {
        self.request.error()
    }

    /// The upgrade transaction while `upgradeneeded` is being handled
    pub fn transaction(&self) -> Option<Transaction> {
        self.request.transaction()
    }

    /// The connection, once the request has produced one
    pub fn connection(&self) -> Option<Connection> {
        self.result().ok().and_then(|r| r.connection())
    }
}

impl EventSource for OpenRequest {
    fn event_target(&self) -> EventTarget {
        self.request.event_target()
    }

    fn listener_table(&self) -> &RefCell<ListenerTable> {
        self.request.listener_table()
    }
}
