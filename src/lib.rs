//! # idbkit
//!
//! An in-process object store engine with IndexedDB semantics:
//! - Named, versioned databases holding object stores and secondary indexes
//! - Ordered keys over numbers, dates, strings, binaries and arrays
//! - Transactions scheduled by scope and mode, with auto-commit and
//!   full rollback
//! - Asynchronous requests and cursors completed through events with
//!   capture and bubble phases
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DatabaseRegistry                         │
//! │          (open / delete / databases / run_until_idle)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Handles                                │
//! │  Connection · Transaction · ObjectStore · Index · Cursor     │
//! │               (validate, then queue requests)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │     scheduler · event loop · open queue · event dispatch     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ RecordStore │          │ IndexStore  │
//!   │  (BTreeMap) │          │  (BTreeMap) │
//!   └─────────────┘          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use idbkit::{DatabaseRegistry, EventSource, EventType, ObjectStoreParameters, Value};
//!
//! let registry = DatabaseRegistry::new();
//! let open = registry.open("library", Some(1)).unwrap();
//! let request = open.clone();
//! open.on(EventType::UpgradeNeeded, move |_| {
//!     let db = request.connection().unwrap();
//!     let books = db.create_object_store("books", ObjectStoreParameters::new().key_path("isbn"))?;
//!     books.put(Value::object([("isbn", Value::from(123)), ("title", Value::from("Dune"))]))?;
//!     Ok(())
//! });
//! registry.run_until_idle();
//!
//! let db = open.connection().unwrap();
//! assert_eq!(db.object_store_names(), vec!["books".to_string()]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod value;
pub mod key;
pub mod keypath;
pub mod storage;
pub mod database;
pub mod event;
pub mod engine;
pub mod handle;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, IdbError, Result};
pub use config::{Config, ConfigBuilder, Durability};
pub use value::{BinaryData, BinaryKind, Value};
pub use key::{Key, KeyRange, Query};
pub use keypath::KeyPath;
pub use event::{Event, EventSource, EventTarget, EventType, ListenerId, ListenerResult, Phase};
pub use engine::{
    ConnectionId, CursorDirection, CursorId, ReadyState, RequestId, TransactionId,
    TransactionMode, TransactionState,
};
pub use handle::{
    Connection, Cursor, CursorSource, Index, IndexParameters, ObjectStore, ObjectStoreParameters,
    OpenRequest, Request, RequestResult, RequestSource, Transaction,
};
pub use registry::{DatabaseInfo, DatabaseRegistry};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of idbkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
