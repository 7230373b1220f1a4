//! Request records
//!
//! A request is the completion slot of one operation. Its outcome refers
//! to cursors and connections by id; handles are built when the caller
//! reads the result.

use crate::error::IdbError;
use crate::key::Key;
use crate::storage::{IndexId, StoreId};
use crate::value::Value;

use super::{ConnectionId, CursorId, Operation, TransactionId};

/// Whether a request has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}

/// What a completed request produced
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum Outcome {
    #[default]
    Undefined,
    Null,
    Value(Value),
    Key(Key),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(CursorId),
    Connection(ConnectionId),
}

/// What a request was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestOrigin {
    None,
    Store(StoreId),
    Index(StoreId, IndexId),
    Cursor(CursorId),
}

/// Open or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenAction {
    Open { version: Option<u64> },
    Delete,
}

/// Progress of an open or delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenPhase {
    Queued,
    /// Waiting for other connections to close
    Blocked {
        old_version: u64,
        new_version: Option<u64>,
    },
    Upgrading,
    Finished,
}

#[derive(Debug, Clone)]
pub(crate) struct OpenRecord {
    pub database: String,
    pub action: OpenAction,
    pub phase: OpenPhase,
}

#[derive(Debug)]
pub(crate) struct RequestRecord {
    pub transaction: Option<TransactionId>,
    pub source: RequestOrigin,
    pub ready: ReadyState,
    pub outcome: Outcome,
    pub error: Option<IdbError>,
    /// Work still to run; taken when the request executes
    pub operation: Option<Operation>,
    pub open: Option<OpenRecord>,
}

impl RequestRecord {
    pub(crate) fn new(
        transaction: Option<TransactionId>,
        source: RequestOrigin,
        operation: Operation,
    ) -> Self {
        Self {
            transaction,
            source,
            ready: ReadyState::Pending,
            outcome: Outcome::Undefined,
            error: None,
            operation: Some(operation),
            open: None,
        }
    }

    pub(crate) fn open(database: &str, action: OpenAction) -> Self {
        Self {
            transaction: None,
            source: RequestOrigin::None,
            ready: ReadyState::Pending,
            outcome: Outcome::Undefined,
            error: None,
            operation: None,
            open: Some(OpenRecord {
                database: database.to_string(),
                action,
                phase: OpenPhase::Queued,
            }),
        }
    }

    /// Complete with an outcome
    pub(crate) fn succeed(&mut self, outcome: Outcome) {
        self.ready = ReadyState::Done;
        self.outcome = outcome;
        self.error = None;
    }

    /// Complete with an error
    pub(crate) fn fail(&mut self, error: IdbError) {
        self.ready = ReadyState::Done;
        self.outcome = Outcome::Undefined;
        self.error = Some(error);
    }
}
