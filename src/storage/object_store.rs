//! Object store data
//!
//! An object store owns its records, its key generator and its indexes.
//! Every write goes through [`ObjectStoreData::store_record`] so that the
//! record and all of its index entries change together or not at all.

use std::collections::BTreeMap;

use crate::error::{IdbError, Result};
use crate::key::{codec, Key, KeyRange};
use crate::keypath::{self, Extracted, KeyPath};
use crate::value::Value;

use super::{IndexId, IndexStore, KeyGenerator, RecordStore};

/// An index over an object store
#[derive(Debug, Clone)]
pub struct IndexData {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
    pub entries: IndexStore,
}

impl IndexData {
    pub fn new(name: impl Into<String>, key_path: KeyPath, unique: bool, multi_entry: bool) -> Self {
        Self {
            name: name.into(),
            key_path,
            unique,
            multi_entry,
            entries: IndexStore::new(),
        }
    }

    /// Index keys a record value produces.
    ///
    /// A missing path yields no entry. In `strict` mode a compound path
    /// whose segments are present but do not form a valid key is a
    /// DataError; otherwise such a record is left out of the index.
    pub fn keys_for(&self, value: &Value, strict: bool) -> Result<Vec<Key>> {
        if self.multi_entry {
            return Ok(self
                .key_path
                .evaluate(value)
                .map(|found| codec::multi_entry_keys(&found))
                .unwrap_or_default());
        }
        match self.key_path.extract(value) {
            Extracted::Key(key) => Ok(vec![key]),
            Extracted::Missing => Ok(Vec::new()),
            Extracted::Invalid if strict && self.key_path.is_sequence() => Err(IdbError::Data(
                format!("compound key path of index '{}' is not a valid key", self.name),
            )),
            Extracted::Invalid => Ok(Vec::new()),
        }
    }
}

/// A single object store
#[derive(Debug, Clone)]
pub struct ObjectStoreData {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub key_generator: Option<KeyGenerator>,
    pub records: RecordStore,
    pub indexes: BTreeMap<IndexId, IndexData>,
}

impl ObjectStoreData {
    pub fn new(name: impl Into<String>, key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        Self {
            name: name.into(),
            key_path,
            key_generator: auto_increment.then(KeyGenerator::new),
            records: RecordStore::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn auto_increment(&self) -> bool {
        self.key_generator.is_some()
    }

    pub fn index_id(&self, name: &str) -> Option<IndexId> {
        self.indexes
            .iter()
            .find(|(_, index)| index.name == name)
            .map(|(id, _)| *id)
    }

    /// Index names in key order
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.values().map(|i| i.name.clone()).collect();
        crate::key::sort_names(&mut names);
        names
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a record, returning its primary key.
    ///
    /// 1. Resolve the key (generate and inject, or observe an explicit one)
    /// 2. Reject an existing key when `no_overwrite` is set
    /// 3. Compute index keys and reject unique collisions
    /// 4. Replace the old record and its index entries
    pub fn store_record(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
        limit: u64,
    ) -> Result<Key> {
        // Step 1: Resolve the primary key
        let key = match (key, self.key_generator.as_mut()) {
            (Some(key), Some(generator)) => {
                generator.observe(&key, limit);
                key
            }
            (Some(key), None) => key,
            (None, Some(generator)) => {
                let key = generator.generate(limit)?;
                if let Some(KeyPath::Path(path)) = &self.key_path {
                    keypath::inject_key(&mut value, path, &key)?;
                }
                key
            }
            (None, None) => {
                return Err(IdbError::Data(format!(
                    "object store '{}' has no key generator and no key was given",
                    self.name
                )))
            }
        };

        // Step 2: Primary key collision
        if no_overwrite && self.records.contains(&key) {
            return Err(IdbError::Constraint(format!(
                "key {} already exists in object store '{}'",
                key, self.name
            )));
        }

        // Step 3: Index keys and unique constraints
        let mut index_keys = Vec::with_capacity(self.indexes.len());
        for (id, index) in &self.indexes {
            let keys = index.keys_for(&value, true)?;
            if index.unique {
                if let Some(taken) = keys.iter().find(|k| index.entries.is_taken_by_other(k, &key)) {
                    return Err(IdbError::Constraint(format!(
                        "index '{}' already contains key {}",
                        index.name, taken
                    )));
                }
            }
            index_keys.push((*id, keys));
        }

        // Step 4: Apply
        if let Some(old) = self.records.insert_or_replace(key.clone(), value) {
            self.unindex(&key, &old);
        }
        for (id, keys) in index_keys {
            if let Some(index) = self.indexes.get_mut(&id) {
                for index_key in keys {
                    index.entries.insert(index_key, key.clone());
                }
            }
        }
        Ok(key)
    }

    /// Delete every record in `range` along with its index entries
    pub fn delete_range(&mut self, range: &KeyRange) -> usize {
        let removed = self.records.delete_range(range);
        for (key, value) in &removed {
            self.unindex(key, value);
        }
        removed.len()
    }

    /// Remove every record and index entry
    pub fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    fn unindex(&mut self, primary_key: &Key, value: &Value) {
        for index in self.indexes.values_mut() {
            if let Ok(keys) = index.keys_for(value, false) {
                for index_key in keys {
                    index.entries.remove(&index_key, primary_key);
                }
            }
        }
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Add an index and fill it from the existing records.
    ///
    /// The index is added even when existing records collide on a unique
    /// index; the collision is reported so the caller can abort.
    pub fn create_index(&mut self, id: IndexId, mut index: IndexData) -> Result<()> {
        let mut collision = None;
        for (primary_key, value) in self.records.iter() {
            let keys = index.keys_for(value, false).unwrap_or_default();
            for index_key in keys {
                if index.unique && collision.is_none() && index.entries.is_taken_by_other(&index_key, primary_key) {
                    collision = Some(index_key.clone());
                }
                index.entries.insert(index_key, primary_key.clone());
            }
        }
        let name = index.name.clone();
        self.indexes.insert(id, index);
        match collision {
            Some(key) => Err(IdbError::Constraint(format!(
                "existing records collide on unique index '{}' at key {}",
                name, key
            ))),
            None => Ok(()),
        }
    }

    pub fn delete_index(&mut self, id: IndexId) -> Option<IndexData> {
        self.indexes.remove(&id)
    }
}
