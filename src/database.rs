//! Database model
//!
//! A database is a name, a version and the object stores it owns. Stores
//! and indexes are addressed by ids that are never reused, so handles
//! held by callers can tell a deleted store from one recreated under the
//! same name.

use std::collections::BTreeMap;

use crate::error::{IdbError, Result};
use crate::key::sort_names;
use crate::keypath::KeyPath;
use crate::storage::{IndexData, IndexId, ObjectStoreData, StoreId};

/// One named database
#[derive(Debug, Clone)]
pub struct Database {
    pub name: String,
    pub version: u64,
    pub stores: BTreeMap<StoreId, ObjectStoreData>,
    next_store_id: u64,
    next_index_id: u64,
}

impl Database {
    /// Create an empty database at version 0
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            stores: BTreeMap::new(),
            next_store_id: 1,
            next_index_id: 1,
        }
    }

    pub fn store_id(&self, name: &str) -> Option<StoreId> {
        self.stores
            .iter()
            .find(|(_, store)| store.name == name)
            .map(|(id, _)| *id)
    }

    pub fn store(&self, id: StoreId) -> Option<&ObjectStoreData> {
        self.stores.get(&id)
    }

    pub fn store_mut(&mut self, id: StoreId) -> Option<&mut ObjectStoreData> {
        self.stores.get_mut(&id)
    }

    /// Store names in key order
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.values().map(|s| s.name.clone()).collect();
        sort_names(&mut names);
        names
    }

    pub fn all_store_ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.keys().copied()
    }

    // =========================================================================
    // Schema Changes
    // =========================================================================

    pub fn create_store(
        &mut self,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> StoreId {
        let id = StoreId(self.next_store_id);
        self.next_store_id += 1;
        self.stores
            .insert(id, ObjectStoreData::new(name, key_path, auto_increment));
        id
    }

    pub fn delete_store(&mut self, id: StoreId) -> Option<ObjectStoreData> {
        self.stores.remove(&id)
    }

    /// Rename a store; ConstraintError when another store has the name
    pub fn rename_store(&mut self, id: StoreId, name: &str) -> Result<()> {
        if self.store_id(name).is_some_and(|other| other != id) {
            return Err(IdbError::Constraint(format!(
                "object store '{}' already exists",
                name
            )));
        }
        let store = self
            .stores
            .get_mut(&id)
            .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
        store.name = name.to_string();
        Ok(())
    }

    /// Add an index to a store and populate it.
    ///
    /// Returns the new id together with the outcome of populating it; a
    /// unique collision over existing records still leaves the index in
    /// place.
    pub fn create_index(&mut self, store: StoreId, index: IndexData) -> (IndexId, Result<()>) {
        let id = IndexId(self.next_index_id);
        self.next_index_id += 1;
        let outcome = match self.stores.get_mut(&store) {
            Some(data) => data.create_index(id, index),
            None => Err(IdbError::InvalidState("object store has been deleted".to_string())),
        };
        (id, outcome)
    }

    /// Rename an index; ConstraintError when the store has another index
    /// with the name
    pub fn rename_index(&mut self, store: StoreId, index: IndexId, name: &str) -> Result<()> {
        let data = self
            .stores
            .get_mut(&store)
            .ok_or_else(|| IdbError::InvalidState("object store has been deleted".to_string()))?;
        if data.index_id(name).is_some_and(|other| other != index) {
            return Err(IdbError::Constraint(format!("index '{}' already exists", name)));
        }
        let target = data
            .indexes
            .get_mut(&index)
            .ok_or_else(|| IdbError::InvalidState("index has been deleted".to_string()))?;
        target.name = name.to_string();
        Ok(())
    }
}
