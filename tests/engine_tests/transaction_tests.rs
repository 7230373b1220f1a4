//! Tests for transactions and requests
//!
//! These tests verify:
//! - Reads and writes through object stores and indexes
//! - The active window, auto-commit and explicit commit
//! - Abort and rollback, including constraint failures
//! - Scheduling order between overlapping transactions
//! - Synchronous argument checks and their precedence

#[path = "../common/mod.rs"]
mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{person, Log};
use idbkit::{
    Durability, ErrorKind, EventSource, EventType, IndexParameters, Key, KeyRange,
    ObjectStoreParameters, Query, TransactionMode, TransactionState, Value,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn seeded_people(registry: &idbkit::DatabaseRegistry) -> idbkit::Connection {
    let db = common::people_db(registry);
    common::seed(
        registry,
        &db,
        "people",
        vec![person(1, "ann"), person(2, "bo"), person(3, "bo"), person(4, "cy")],
    );
    db
}

fn users_db(registry: &idbkit::DatabaseRegistry) -> idbkit::Connection {
    common::open_with(registry, "users", 1, |db, _| {
        let store = db.create_object_store("users", ObjectStoreParameters::new().key_path("id"))?;
        store.create_index("by_email", "email", IndexParameters::new().unique(true))?;
        Ok(())
    })
}

fn user(id: i32, email: &str) -> Value {
    Value::object([("id", Value::from(id)), ("email", Value::from(email))])
}

fn count_of(registry: &idbkit::DatabaseRegistry, db: &idbkit::Connection, store: &str) -> u64 {
    let txn = db.transaction([store], TransactionMode::ReadOnly).unwrap();
    let request = txn.object_store(store).unwrap().count(Query::all()).unwrap();
    common::settle(registry, &request).count().unwrap()
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[test]
fn test_put_then_get() {
    let registry = common::registry();
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("people").unwrap();
    let found = store.get(1).unwrap();
    let missing = store.get(99).unwrap();
    let key = store.get_key(KeyRange::lower_bound(Key::from(3), false)).unwrap();
    let all_keys = store.get_all_keys(Query::all(), None).unwrap();
    let first_two = store.get_all(Query::all(), Some(2)).unwrap();
    registry.run_until_idle();

    assert_eq!(found.result().unwrap().value(), Some(&person(1, "ann")));
    assert!(missing.result().unwrap().is_undefined());
    assert_eq!(key.result().unwrap().key(), Some(&Key::from(3)));
    assert_eq!(
        all_keys.result().unwrap().keys().unwrap(),
        &[Key::from(1), Key::from(2), Key::from(3), Key::from(4)]
    );
    assert_eq!(
        first_two.result().unwrap().values().unwrap(),
        &[person(1, "ann"), person(2, "bo")]
    );
    assert_eq!(txn.state(), TransactionState::Committed);
}

#[test]
fn test_index_reads() {
    let registry = common::registry();
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadOnly).unwrap();
    let index = txn.object_store("people").unwrap().index("by_name").unwrap();
    let first_bo = index.get("bo").unwrap();
    let bo_key = index.get_key("bo").unwrap();
    let bo_count = index.count("bo").unwrap();
    let all = index.get_all_keys(Query::all(), None).unwrap();
    registry.run_until_idle();

    assert_eq!(first_bo.result().unwrap().value(), Some(&person(2, "bo")));
    assert_eq!(bo_key.result().unwrap().key(), Some(&Key::from(2)));
    assert_eq!(bo_count.result().unwrap().count(), Some(2));
    // Primary keys in index order
    assert_eq!(
        all.result().unwrap().keys().unwrap(),
        &[Key::from(1), Key::from(2), Key::from(3), Key::from(4)]
    );
}

#[test]
fn test_delete_range_and_clear() {
    let registry = common::registry();
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    store
        .delete(KeyRange::bound(Key::from(2), Key::from(3), false, false).unwrap())
        .unwrap();
    let after_delete = store.count(Query::all()).unwrap();
    store.clear().unwrap();
    let after_clear = store.count(Query::all()).unwrap();
    registry.run_until_idle();

    assert_eq!(after_delete.result().unwrap().count(), Some(2));
    assert_eq!(after_clear.result().unwrap().count(), Some(0));
    assert_eq!(count_of(&registry, &db, "people"), 0);
}

#[test]
fn test_put_replaces_index_entries() {
    let registry = common::registry();
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    store.put(person(2, "zed")).unwrap();
    let bo = store.index("by_name").unwrap().count("bo").unwrap();
    let zed = store.index("by_name").unwrap().get_key("zed").unwrap();
    registry.run_until_idle();

    assert_eq!(bo.result().unwrap().count(), Some(1));
    assert_eq!(zed.result().unwrap().key(), Some(&Key::from(2)));
}

// =============================================================================
// Active Window / Commit Tests
// =============================================================================

#[test]
fn test_auto_commit_fires_complete_once() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    let put = store.put(person(1, "ann")).unwrap();

    let log = Log::new();
    let l = log.clone();
    txn.on(EventType::Complete, move |_| {
        l.push("complete");
        Ok(())
    });
    registry.run_until_idle();

    assert_eq!(log.entries(), vec!["complete"]);
    assert_eq!(put.result().unwrap().key(), Some(&Key::from(1)));
    let err = store.put(person(2, "bo")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionInactive);
}

#[test]
fn test_requests_from_later_task_are_rejected() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("people").unwrap();
    let seen = Rc::new(RefCell::new(None));
    let s = Rc::clone(&seen);
    registry.queue_task(move || {
        *s.borrow_mut() = store.get(1).err().map(|e| e.kind());
    });
    registry.run_until_idle();

    assert_eq!(*seen.borrow(), Some(ErrorKind::TransactionInactive));
}

#[test]
fn test_microtask_inside_listener_can_place_requests() {
    let registry = Rc::new(common::registry());
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadOnly).unwrap();
    let store = txn.object_store("people").unwrap();
    let first = store.get(1).unwrap();

    let second = Rc::new(RefCell::new(None));
    let (reg, slot) = (Rc::clone(&registry), Rc::clone(&second));
    first.on(EventType::Success, move |_| {
        let (store, slot) = (store.clone(), Rc::clone(&slot));
        reg.queue_microtask(move || {
            *slot.borrow_mut() = Some(store.get(2));
        });
        Ok(())
    });
    registry.run_until_idle();

    let request = second.borrow_mut().take().unwrap().unwrap();
    assert_eq!(request.result().unwrap().value(), Some(&person(2, "bo")));
}

#[test]
fn test_explicit_commit() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    store.put(person(1, "ann")).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.put(person(2, "bo")).unwrap_err().kind(), ErrorKind::TransactionInactive);
    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::InvalidState);

    registry.run_until_idle();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(count_of(&registry, &db, "people"), 1);
}

#[test]
fn test_durability_is_reported() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let relaxed = db
        .transaction_with_durability(["people"], TransactionMode::ReadOnly, Durability::Relaxed)
        .unwrap();
    let default = db.transaction(["people"], TransactionMode::ReadOnly).unwrap();
    assert_eq!(relaxed.durability(), Durability::Relaxed);
    assert_eq!(default.durability(), Durability::Default);
    registry.run_until_idle();
}

// =============================================================================
// Abort Tests
// =============================================================================

#[test]
fn test_abort_rolls_back_clear() {
    let registry = common::registry();
    let db = common::people_db(&registry);
    common::seed(&registry, &db, "people", (1..=10).map(|i| person(i, "p")).collect());

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("people").unwrap();
    store.clear().unwrap();
    let count = store.count(Query::all()).unwrap();
    let log = Log::new();
    let (l, t, c) = (log.clone(), txn.clone(), count.clone());
    count.on(EventType::Success, move |_| {
        l.push(format!("count {}", c.result()?.count().unwrap_or_default()));
        t.abort()?;
        Ok(())
    });
    let (l1, l2) = (log.clone(), log.clone());
    txn.on(EventType::Abort, move |_| {
        l1.push("abort");
        Ok(())
    });
    txn.on(EventType::Complete, move |_| {
        l2.push("complete");
        Ok(())
    });
    registry.run_until_idle();

    assert_eq!(log.entries(), vec!["count 0", "abort"]);
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert!(txn.error().is_none());
    assert_eq!(count_of(&registry, &db, "people"), 10);
}

#[test]
fn test_abort_fails_queued_requests() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let put = txn.object_store("people").unwrap().put(person(1, "ann")).unwrap();
    let log = Log::new();
    let (l1, l2) = (log.clone(), log.clone());
    put.on(EventType::Error, move |_| {
        l1.push("request error");
        Ok(())
    });
    db.on(EventType::Abort, move |event| {
        l2.push(format!("abort at connection, bubbles={}", event.bubbles()));
        Ok(())
    });
    txn.abort().unwrap();
    assert_eq!(txn.abort().unwrap_err().kind(), ErrorKind::InvalidState);
    registry.run_until_idle();

    assert_eq!(
        log.entries(),
        vec!["request error", "abort at connection, bubbles=true"]
    );
    assert_eq!(put.error().unwrap().map(|e| e.kind()), Some(ErrorKind::Abort));
    assert_eq!(count_of(&registry, &db, "people"), 0);
}

#[test]
fn test_unique_collision_aborts() {
    let registry = common::registry();
    let db = users_db(&registry);

    let txn = db.transaction(["users"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("users").unwrap();
    store.add(user(1, "a@x")).unwrap();
    let second = store.add(user(2, "a@x")).unwrap();
    registry.run_until_idle();

    assert_eq!(second.error().unwrap().map(|e| e.kind()), Some(ErrorKind::Constraint));
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(txn.error().map(|e| e.kind()), Some(ErrorKind::Constraint));
    assert_eq!(count_of(&registry, &db, "users"), 0);
}

#[test]
fn test_prevent_default_keeps_transaction_alive() {
    let registry = common::registry();
    let db = users_db(&registry);

    let txn = db.transaction(["users"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("users").unwrap();
    store.add(user(1, "a@x")).unwrap();
    let second = store.add(user(2, "a@x")).unwrap();
    second.on(EventType::Error, |event| {
        event.prevent_default();
        Ok(())
    });
    store.add(user(3, "c@x")).unwrap();
    registry.run_until_idle();

    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(count_of(&registry, &db, "users"), 2);
}

#[test]
fn test_add_existing_primary_key_fails() {
    let registry = common::registry();
    let db = seeded_people(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let add = txn.object_store("people").unwrap().add(person(1, "again")).unwrap();
    registry.run_until_idle();

    assert_eq!(add.error().unwrap().map(|e| e.kind()), Some(ErrorKind::Constraint));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_listener_failure_aborts() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let txn = db.transaction(["people"], TransactionMode::ReadWrite).unwrap();
    let put = txn.object_store("people").unwrap().put(person(1, "ann")).unwrap();
    put.on(EventType::Success, |_| Err("listener blew up".into()));
    registry.run_until_idle();

    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(txn.error().map(|e| e.kind()), Some(ErrorKind::Abort));
    assert_eq!(count_of(&registry, &db, "people"), 0);
}

// =============================================================================
// Key Generator Tests
// =============================================================================

#[test]
fn test_generated_keys_are_injected_and_rolled_back() {
    let registry = common::registry();
    let db = common::open_with(&registry, "notes", 1, |db, _| {
        db.create_object_store(
            "notes",
            ObjectStoreParameters::new().key_path("id").auto_increment(true),
        )?;
        Ok(())
    });
    let note = |text: &str| Value::object([("text", Value::from(text))]);

    let txn = db.transaction(["notes"], TransactionMode::ReadWrite).unwrap();
    let store = txn.object_store("notes").unwrap();
    let keys: Vec<_> = ["a", "b", "c"].into_iter().map(|t| store.add(note(t)).unwrap()).collect();
    let stored = store.get(2).unwrap();
    registry.run_until_idle();
    let keys: Vec<Key> = keys.iter().map(|r| r.result().unwrap().key().cloned().unwrap()).collect();
    assert_eq!(keys, vec![Key::from(1), Key::from(2), Key::from(3)]);
    assert_eq!(
        stored.result().unwrap().value().and_then(|v| v.get("id")).cloned(),
        Some(Value::from(2))
    );

    // An aborted transaction hands its generated key out again
    let txn = db.transaction(["notes"], TransactionMode::ReadWrite).unwrap();
    let aborted = txn.object_store("notes").unwrap().add(note("d")).unwrap();
    let t = txn.clone();
    aborted.on(EventType::Success, move |_| {
        t.abort()?;
        Ok(())
    });
    registry.run_until_idle();

    let txn = db.transaction(["notes"], TransactionMode::ReadWrite).unwrap();
    let again = txn.object_store("notes").unwrap().add(note("d")).unwrap();
    assert_eq!(common::settle(&registry, &again).key(), Some(&Key::from(4)));
}

// =============================================================================
// Scheduling Tests
// =============================================================================

#[test]
fn test_readers_do_not_overtake_waiting_writer() {
    let registry = common::registry();
    let db = seeded_people(&registry);
    let log = Log::new();

    let start = |label: String, mode: TransactionMode| {
        let txn = db.transaction(["people"], mode).unwrap();
        txn.object_store("people").unwrap().get(1).unwrap();
        let l = log.clone();
        txn.on(EventType::Complete, move |_| {
            l.push(label.clone());
            Ok(())
        });
    };
    for i in 1..=5 {
        start(format!("ro{}", i), TransactionMode::ReadOnly);
    }
    start("rw1".to_string(), TransactionMode::ReadWrite);
    start("rw2".to_string(), TransactionMode::ReadWrite);
    for i in 6..=10 {
        start(format!("ro{}", i), TransactionMode::ReadOnly);
    }
    registry.run_until_idle();

    let expected: Vec<String> = ["ro1", "ro2", "ro3", "ro4", "ro5", "rw1", "rw2", "ro6", "ro7", "ro8", "ro9", "ro10"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(log.entries(), expected);
}

#[test]
fn test_disjoint_writers_run_together() {
    let registry = common::registry();
    let db = common::open_with(&registry, "two", 1, |db, _| {
        db.create_object_store("a", ObjectStoreParameters::new())?;
        db.create_object_store("b", ObjectStoreParameters::new())?;
        Ok(())
    });

    let first = db.transaction(["a"], TransactionMode::ReadWrite).unwrap();
    let second = db.transaction(["b"], TransactionMode::ReadWrite).unwrap();
    let third = db.transaction(["a", "b"], TransactionMode::ReadWrite).unwrap();
    assert_eq!(first.state(), TransactionState::Active);
    assert_eq!(second.state(), TransactionState::Active);
    assert_eq!(third.state(), TransactionState::Pending);
    registry.run_until_idle();
    assert_eq!(third.state(), TransactionState::Committed);
}

// =============================================================================
// Argument Check Tests
// =============================================================================

#[test]
fn test_transaction_creation_errors() {
    let registry = common::registry();
    let db = common::people_db(&registry);

    let kind = |result: idbkit::Result<idbkit::Transaction>| result.unwrap_err().kind();
    assert_eq!(kind(db.transaction(["nope"], TransactionMode::ReadOnly)), ErrorKind::NotFound);
    assert_eq!(
        kind(db.transaction(Vec::<&str>::new(), TransactionMode::ReadOnly)),
        ErrorKind::InvalidAccess
    );
    assert_eq!(
        kind(db.transaction(["people"], TransactionMode::VersionChange)),
        ErrorKind::Type
    );

    db.close();
    assert_eq!(
        kind(db.transaction(["people"], TransactionMode::ReadOnly)),
        ErrorKind::InvalidState
    );
}

#[test]
fn test_scope_names_are_sorted_and_deduplicated() {
    let registry = common::registry();
    let db = common::open_with(&registry, "two", 1, |db, _| {
        db.create_object_store("b", ObjectStoreParameters::new())?;
        db.create_object_store("a", ObjectStoreParameters::new())?;
        Ok(())
    });
    let txn = db.transaction(["b", "a", "b"], TransactionMode::ReadOnly).unwrap();
    assert_eq!(txn.object_store_names(), vec!["a", "b"]);
    assert_eq!(txn.object_store("c").unwrap_err().kind(), ErrorKind::NotFound);
    registry.run_until_idle();
}

#[test]
fn test_request_check_precedence() {
    let registry = common::registry();
    let db = common::open_with(&registry, "mixed", 1, |db, _| {
        db.create_object_store("inline", ObjectStoreParameters::new().key_path("id"))?;
        db.create_object_store("outline", ObjectStoreParameters::new())?;
        Ok(())
    });

    let ro = db.transaction(["inline"], TransactionMode::ReadOnly).unwrap();
    let store = ro.object_store("inline").unwrap();
    // ReadOnly wins over the bad value
    assert_eq!(store.put(Value::from(1)).unwrap_err().kind(), ErrorKind::ReadOnly);
    assert_eq!(store.get(Query::all()).unwrap_err().kind(), ErrorKind::Data);
    assert_eq!(store.get(Value::Null).unwrap_err().kind(), ErrorKind::Data);

    let rw = db.transaction(["inline", "outline"], TransactionMode::ReadWrite).unwrap();
    let inline = rw.object_store("inline").unwrap();
    let outline = rw.object_store("outline").unwrap();
    let kind = |result: idbkit::Result<idbkit::Request>| result.unwrap_err().kind();
    assert_eq!(kind(inline.put_with_key(person(1, "a"), 1)), ErrorKind::Data);
    assert_eq!(kind(inline.put(Value::object([("name", Value::from("a"))]))), ErrorKind::Data);
    assert_eq!(kind(inline.put(Value::object([("id", Value::Bool(true))]))), ErrorKind::Data);
    assert_eq!(kind(outline.put(Value::from("no key"))), ErrorKind::Data);
    assert_eq!(kind(outline.put_with_key(Value::from("v"), Value::Null)), ErrorKind::Data);
    assert_eq!(kind(outline.delete(Query::all())), ErrorKind::Data);
    registry.run_until_idle();

    // Once finished, inactivity is reported before the bad argument
    assert_eq!(
        kind(inline.put_with_key(person(1, "a"), 1)),
        ErrorKind::TransactionInactive
    );
    assert_eq!(ro.object_store("inline").unwrap_err().kind(), ErrorKind::InvalidState);
}
