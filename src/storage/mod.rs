//! Storage Module
//!
//! Memory-resident record and index storage.
//!
//! ## Responsibilities
//! - Keep each object store's records sorted by primary key
//! - Maintain index entries alongside every record write and delete
//! - Enforce primary key and unique index constraints atomically
//! - Generate keys for `autoIncrement` stores
//!
//! ## Layout
//! ```text
//! ObjectStoreData
//! ├── RecordStore   BTreeMap<primary key, Value>
//! ├── KeyGenerator  current number (autoIncrement only)
//! └── IndexData*    BTreeMap<index key, BTreeSet<primary key>>
//! ```
//!
//! Nothing here knows about transactions; rollback works by cloning an
//! `ObjectStoreData` (or a whole database) before the first mutation.

mod index_store;
mod key_generator;
mod object_store;
mod record_store;

pub use index_store::{Entries, IndexStore};
pub use key_generator::KeyGenerator;
pub use object_store::{IndexData, ObjectStoreData};
pub use record_store::{RecordStore, Records};

/// Identifies an object store within its database.
///
/// Ids are never reused, so a handle to a deleted store never resolves
/// to a store created later under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub(crate) u64);

/// Identifies an index within its database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub(crate) u64);
