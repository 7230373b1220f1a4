//! Shared helpers for the integration test targets

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use idbkit::{
    Connection, DatabaseRegistry, EventSource, EventType, IndexParameters, ObjectStoreParameters,
    Request, RequestResult, Transaction, Value,
};

// =============================================================================
// Setup
// =============================================================================

/// Route engine logs to the test harness; `RUST_LOG=idbkit=trace` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn registry() -> DatabaseRegistry {
    init_tracing();
    DatabaseRegistry::new()
}

/// Open `name` at `version`, running `upgrade` inside `upgradeneeded`,
/// and drive the loop until the open completes
pub fn open_with<F>(registry: &DatabaseRegistry, name: &str, version: u64, upgrade: F) -> Connection
where
    F: Fn(&Connection, &Transaction) -> idbkit::Result<()> + 'static,
{
    let open = registry.open(name, Some(version)).expect("open should be accepted");
    let request = open.clone();
    open.on(EventType::UpgradeNeeded, move |_| {
        let db = request.connection().expect("connection during upgrade");
        let txn = request.transaction().expect("upgrade transaction");
        upgrade(&db, &txn)?;
        Ok(())
    });
    registry.run_until_idle();
    open.connection().expect("open should succeed")
}

/// Database "people" with store "people" (key path "id") and a
/// non-unique "by_name" index over "name"
pub fn people_db(registry: &DatabaseRegistry) -> Connection {
    open_with(registry, "people", 1, |db, _| {
        let store = db.create_object_store("people", ObjectStoreParameters::new().key_path("id"))?;
        store.create_index("by_name", "name", IndexParameters::new())?;
        Ok(())
    })
}

pub fn person(id: i32, name: &str) -> Value {
    Value::object([("id", Value::from(id)), ("name", Value::from(name))])
}

/// Put `records` into `store` in one readwrite transaction
pub fn seed(registry: &DatabaseRegistry, db: &Connection, store: &str, records: Vec<Value>) {
    let txn = db
        .transaction([store], idbkit::TransactionMode::ReadWrite)
        .expect("seed transaction");
    let target = txn.object_store(store).expect("seed store");
    for record in records {
        target.put(record).expect("seed put");
    }
    registry.run_until_idle();
}

/// Drive the loop and return the request's result
pub fn settle(registry: &DatabaseRegistry, request: &Request) -> RequestResult {
    registry.run_until_idle();
    request.result().expect("request should be done")
}

// =============================================================================
// Recording
// =============================================================================

/// Ordered log of what listeners saw
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}
