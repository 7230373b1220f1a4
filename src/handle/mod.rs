//! Handle Module
//!
//! Cheap, clonable views onto engine records.
//!
//! ## Responsibilities
//! - Validate calls synchronously in the order the error model requires
//! - Turn accepted calls into queued requests
//! - Expose request results, cursor state and listener registration
//!
//! Handles hold the registry's shared state, ids and a lease on the
//! records they point into. Every handle derived from a transaction
//! (its stores, indexes, requests and cursors) shares one lease; when the
//! transaction has finished and the last of them is dropped, the engine
//! releases those records.

mod connection;
mod cursor;
mod index;
mod object_store;
mod request;
mod transaction;

pub use connection::Connection;
pub use cursor::{Cursor, CursorSource};
pub use index::Index;
pub use object_store::ObjectStore;
pub use request::{OpenRequest, Request, RequestResult, RequestSource};
pub use transaction::Transaction;

use crate::keypath::KeyPath;

/// Options for `Connection::create_object_store`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreParameters {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

impl ObjectStoreParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use in-line keys read from `path`
    pub fn key_path(mut self, path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Generate keys for records stored without one
    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

/// Options for `ObjectStore::create_index`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParameters {
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// One entry per array element instead of one per record
    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}
