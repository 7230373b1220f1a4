//! Database registry
//!
//! The explicit home of every database a process opens. Each registry is
//! independent, so tests can create one per case.
//!
//! ## Lifecycle
//! 1. `DatabaseRegistry::new()` (or `with_config`) creates an empty registry
//! 2. `open`/`delete_database` queue requests; nothing happens until
//!    `run_until_idle` drives the event loop
//! 3. Dropping the registry releases every listener and queued callback;
//!    handles that outlive it keep answering queries but no further
//!    events are delivered

use std::cmp::Ordering;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::{Owner, RequestId, Shared, Task};
use crate::error::Result;
use crate::handle::{OpenRequest, Request};
use crate::key::{compare, compare_strings, to_key};
use crate::value::Value;

/// Name and version of an existing database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Owner of databases and the event loop that drives them
pub struct DatabaseRegistry {
    shared: Rc<Shared>,
}

impl DatabaseRegistry {
    /// Create a registry with the default config
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            shared: Rc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// Open a connection, creating or upgrading the database as needed.
    ///
    /// `None` opens at the current version (1 for a new database).
    /// `Some(0)` is a TypeError.
    pub fn open(&self, name: &str, version: Option<u64>) -> Result<OpenRequest> {
        let id = self.shared.open_database(name, version)?;
        Ok(self.open_request(id))
    }

    /// Delete a database once every connection to it has closed
    pub fn delete_database(&self, name: &str) -> OpenRequest {
        let id = self.shared.delete_database(name);
        self.open_request(id)
    }

    fn open_request(&self, id: RequestId) -> OpenRequest {
        let lease = self.shared.lease(Owner::OpenRequest(id));
        OpenRequest::new(Request::new(Rc::clone(&self.shared), id, lease))
    }

    /// Existing databases, sorted by name
    pub fn databases(&self) -> Vec<DatabaseInfo> {
        let state = self.shared.state.borrow();
        let mut infos: Vec<DatabaseInfo> = state
            .databases
            .values()
            .filter(|db| db.version > 0)
            .map(|db| DatabaseInfo {
                name: db.name.clone(),
                version: db.version,
            })
            .collect();
        infos.sort_by(|a, b| compare_strings(&a.name, &b.name));
        infos
    }

    /// Compare two values as keys; DataError if either is not a valid key
    pub fn cmp(&self, first: impl Into<Value>, second: impl Into<Value>) -> Result<Ordering> {
        let first = to_key(&first.into())?;
        let second = to_key(&second.into())?;
        Ok(compare(&first, &second))
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Run queued tasks until none remain; returns the number run
    pub fn run_until_idle(&self) -> usize {
        self.shared.run_until_idle()
    }

    /// Schedule `callback` as a later task
    pub fn queue_task(&self, callback: impl FnOnce() + 'static) {
        self.shared.queue_task(Task::Callback(Box::new(callback)));
    }

    /// Schedule `callback` to run before the current task ends
    pub fn queue_microtask(&self, callback: impl FnOnce() + 'static) {
        self.shared.queue_microtask(Box::new(callback));
    }
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DatabaseRegistry {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
