//! Request operations
//!
//! Each queued request carries one [`Operation`]. Argument checks already
//! happened when the request was placed; what can still fail here is the
//! write itself (constraints, key generation) or a source deleted in the
//! meantime.

use crate::error::{IdbError, Result};
use crate::key::{Key, KeyRange};
use crate::storage::{IndexData, IndexId, ObjectStoreData, StoreId};
use crate::value::Value;

use super::transaction::store_for_write;
use super::{CursorId, Outcome, Shared, State, TransactionId};

/// Store or index a read goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Store(StoreId),
    Index(StoreId, IndexId),
}

impl Source {
    pub(crate) fn store(&self) -> StoreId {
        match self {
            Source::Store(store) | Source::Index(store, _) => *store,
        }
    }
}

/// Whether a read returns values or primary keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Want {
    Value,
    Key,
}

/// Work carried by a queued request
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Store {
        store: StoreId,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    },
    Get {
        source: Source,
        range: KeyRange,
        want: Want,
    },
    GetAll {
        source: Source,
        range: KeyRange,
        count: Option<u32>,
        want: Want,
    },
    Count {
        source: Source,
        range: KeyRange,
    },
    Delete {
        store: StoreId,
        range: KeyRange,
    },
    Clear {
        store: StoreId,
    },
    Iterate {
        cursor: CursorId,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    },
}

/// Resolve a read source, failing when it was deleted
pub(crate) fn resolve(
    state: &State,
    txn: TransactionId,
    source: Source,
) -> Result<(&ObjectStoreData, Option<&IndexData>)> {
    let store = state
        .store(txn, source.store())
        .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
    match source {
        Source::Store(_) => Ok((store, None)),
        Source::Index(_, index) => {
            let index = store
                .indexes
                .get(&index)
                .ok_or_else(|| IdbError::InvalidState("index has been deleted".to_string()))?;
            Ok((store, Some(index)))
        }
    }
}

impl Shared {
    /// Execute one operation on behalf of `txn`
    pub(crate) fn execute(&self, txn: TransactionId, operation: Operation) -> Result<Outcome> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        match operation {
            Operation::Store {
                store,
                value,
                key,
                no_overwrite,
            } => {
                let data = store_for_write(state, txn, store)?;
                let key = data.store_record(value, key, no_overwrite, self.config.key_generator_limit)?;
                Ok(Outcome::Key(key))
            }

            Operation::Get { source, range, want } => {
                let (store, index) = resolve(state, txn, source)?;
                let found = match index {
                    None => store
                        .records
                        .range(&range)
                        .next()
                        .map(|(key, value)| pick(want, key, value)),
                    Some(index) => index.entries.range(&range).next().and_then(|(_, pk)| {
                        store.records.get(pk).map(|value| pick(want, pk, value))
                    }),
                };
                Ok(found.unwrap_or(Outcome::Undefined))
            }

            Operation::GetAll {
                source,
                range,
                count,
                want,
            } => {
                let (store, index) = resolve(state, txn, source)?;
                let limit = match count {
                    Some(0) | None => usize::MAX,
                    Some(n) => n as usize,
                };
                let records: Vec<(&Key, &Value)> = match index {
                    None => store.records.range(&range).take(limit).collect(),
                    Some(index) => index
                        .entries
                        .range(&range)
                        .filter_map(|(_, pk)| store.records.get(pk).map(|value| (pk, value)))
                        .take(limit)
                        .collect(),
                };
                Ok(match want {
                    Want::Value => Outcome::Values(records.into_iter().map(|(_, v)| v.clone()).collect()),
                    Want::Key => Outcome::Keys(records.into_iter().map(|(k, _)| k.clone()).collect()),
                })
            }

            Operation::Count { source, range } => {
                let (store, index) = resolve(state, txn, source)?;
                let count = match index {
                    None => store.records.count(&range),
                    Some(index) => index.entries.count(&range),
                };
                Ok(Outcome::Count(count as u64))
            }

            Operation::Delete { store, range } => {
                store_for_write(state, txn, store)?.delete_range(&range);
                Ok(Outcome::Undefined)
            }

            Operation::Clear { store } => {
                store_for_write(state, txn, store)?.clear();
                Ok(Outcome::Undefined)
            }

            Operation::Iterate {
                cursor,
                key,
                primary_key,
                count,
            } => {
                let State {
                    databases,
                    transactions,
                    cursors,
                    ..
                } = state;
                let record = cursors
                    .get_mut(&cursor)
                    .ok_or_else(|| IdbError::InvalidState("unknown cursor".to_string()))?;
                let store = transactions
                    .get(&txn)
                    .and_then(|t| databases.get(&t.database))
                    .and_then(|db| db.store(record.store))
                    .ok_or_else(|| {
                        IdbError::InvalidState("object store has been deleted".to_string())
                    })?;
                if record.iterate(store, key, primary_key, count)? {
                    Ok(Outcome::Cursor(cursor))
                } else {
                    Ok(Outcome::Null)
                }
            }
        }
    }
}

fn pick(want: Want, key: &Key, value: &Value) -> Outcome {
    match want {
        Want::Value => Outcome::Value(value.clone()),
        Want::Key => Outcome::Key(key.clone()),
    }
}
