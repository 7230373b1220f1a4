//! Tests for the storage layer
//!
//! These tests verify:
//! - Ordered record storage and range scans
//! - Index entries grouped by index key
//! - Object store writes: key generation, overwrite, index upkeep
//! - Database schema bookkeeping

#[path = "../common/mod.rs"]
mod common;

use idbkit::config::MAX_GENERATED_KEY;
use idbkit::database::Database;
use idbkit::storage::{IndexData, IndexStore, ObjectStoreData, RecordStore};
use idbkit::{ErrorKind, Key, KeyPath, KeyRange, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn numbered(n: i32) -> RecordStore {
    let mut store = RecordStore::new();
    for i in 1..=n {
        store.insert_or_replace(Key::from(i), Value::from(i * 10));
    }
    store
}

fn keys<'a>(iter: impl Iterator<Item = (&'a Key, &'a Value)>) -> Vec<Key> {
    iter.map(|(k, _)| k.clone()).collect()
}

// =============================================================================
// RecordStore Tests
// =============================================================================

#[test]
fn test_record_store_range_scan() {
    let store = numbered(10);
    let range = KeyRange::bound(Key::from(3), Key::from(6), false, true).unwrap();
    assert_eq!(keys(store.range(&range)), vec![Key::from(3), Key::from(4), Key::from(5)]);
    assert_eq!(
        keys(store.range(&range).rev()),
        vec![Key::from(5), Key::from(4), Key::from(3)]
    );
    assert_eq!(store.count(&range), 3);
    assert_eq!(store.count(&KeyRange::unbounded()), 10);
}

#[test]
fn test_record_store_range_walks_both_ends() {
    let store = numbered(6);
    let range = KeyRange::lower_bound(Key::from(2), true);
    let mut records = store.range(&range);
    assert_eq!(records.next().map(|(k, _)| k.clone()), Some(Key::from(3)));
    assert_eq!(records.next_back().map(|(_, v)| v.clone()), Some(Value::from(60)));
    assert_eq!(keys(records), vec![Key::from(4), Key::from(5)]);
}

#[test]
fn test_record_store_replace_returns_old_value() {
    let mut store = numbered(2);
    let old = store.insert_or_replace(Key::from(1), Value::from("new"));
    assert_eq!(old, Some(Value::from(10)));
    assert_eq!(store.get(&Key::from(1)), Some(&Value::from("new")));
    assert_eq!(store.len(), 2);
}

#[test]
fn test_record_store_delete_range() {
    let mut store = numbered(5);
    let removed = store.delete_range(&KeyRange::lower_bound(Key::from(4), false));
    assert_eq!(removed.len(), 2);
    assert_eq!(keys(store.iter()), vec![Key::from(1), Key::from(2), Key::from(3)]);

    let removed = store.delete_range(&KeyRange::only(Key::from("missing")));
    assert!(removed.is_empty());
}

#[test]
fn test_record_store_empty_interval() {
    let store = numbered(5);
    let range = KeyRange::upper_bound(Key::from(0), false);
    assert_eq!(store.range(&range).count(), 0);
    assert!(!store.is_empty());
}

// =============================================================================
// IndexStore Tests
// =============================================================================

#[test]
fn test_index_store_orders_by_index_then_primary_key() {
    let mut index = IndexStore::new();
    index.insert(Key::from("bob"), Key::from(3));
    index.insert(Key::from("alice"), Key::from(9));
    index.insert(Key::from("bob"), Key::from(1));

    let entries: Vec<(Key, Key)> = index
        .range(&KeyRange::unbounded())
        .map(|(ik, pk)| (ik.clone(), pk.clone()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Key::from("alice"), Key::from(9)),
            (Key::from("bob"), Key::from(1)),
            (Key::from("bob"), Key::from(3)),
        ]
    );
    assert_eq!(index.len(), 3);
    assert_eq!(index.count(&KeyRange::only(Key::from("bob"))), 2);
}

#[test]
fn test_index_store_remove_drops_empty_group() {
    let mut index = IndexStore::new();
    index.insert(Key::from("x"), Key::from(1));
    index.remove(&Key::from("x"), &Key::from(1));
    assert!(index.primary_keys(&Key::from("x")).is_none());
    assert!(index.is_empty());
}

// =============================================================================
// ObjectStoreData Tests
// =============================================================================

#[test]
fn test_key_generator_sequence() {
    let mut store = ObjectStoreData::new("items", None, true);
    let mut put = |key: Option<Key>| {
        store
            .store_record(Value::from("v"), key, false, MAX_GENERATED_KEY)
            .unwrap()
    };
    assert_eq!(put(None), Key::from(1));
    assert_eq!(put(None), Key::from(2));
    assert_eq!(put(Some(Key::from(10))), Key::from(10));
    assert_eq!(put(None), Key::from(11));
    // Lower, fractional and non-number keys leave the counter alone
    put(Some(Key::Number(5.5)));
    put(Some(Key::from("text")));
    assert_eq!(put(None), Key::from(12));
    put(Some(Key::Number(20.7)));
    assert_eq!(put(None), Key::from(21));
}

#[test]
fn test_key_generator_follows_explicit_key() {
    let mut store = ObjectStoreData::new("items", None, true);
    let mut put = |key: Option<Key>| {
        store
            .store_record(Value::from("v"), key, true, MAX_GENERATED_KEY)
            .unwrap()
    };
    assert_eq!(put(Some(Key::from(5))), Key::from(5));
    assert_eq!(put(None), Key::from(6));
    assert_eq!(put(None), Key::from(7));
    assert_eq!(put(Some(Key::from(10))), Key::from(10));
    assert_eq!(put(None), Key::from(11));
}

#[test]
fn test_key_generator_exhaustion() {
    let mut store = ObjectStoreData::new("items", None, true);
    store.store_record(Value::Null, Some(Key::from(1000)), false, 1000).unwrap();
    let err = store.store_record(Value::Null, None, false, 1000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
}

#[test]
fn test_add_rejects_existing_key() {
    let mut store = ObjectStoreData::new("items", None, false);
    store.store_record(Value::from(1), Some(Key::from("a")), true, MAX_GENERATED_KEY).unwrap();
    let err = store
        .store_record(Value::from(2), Some(Key::from("a")), true, MAX_GENERATED_KEY)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert_eq!(store.records.get(&Key::from("a")), Some(&Value::from(1)));
}

#[test]
fn test_delete_range_unindexes() {
    let mut db = Database::new("people");
    let store = db.create_store("people", Some(KeyPath::from("id")), false);
    let (_, outcome) = db.create_index(store, IndexData::new("by_name", KeyPath::from("name"), false, false));
    outcome.unwrap();

    let data = db.store_mut(store).unwrap();
    for (id, name) in [(1, "ann"), (2, "bo"), (3, "cy")] {
        data.store_record(common::person(id, name), Some(Key::from(id)), false, MAX_GENERATED_KEY)
            .unwrap();
    }
    let range = KeyRange::bound(Key::from(1), Key::from(2), false, false).unwrap();
    assert_eq!(data.delete_range(&range), 2);

    let index = data.indexes.values().next().unwrap();
    assert_eq!(index.entries.len(), 1);
    assert!(index.entries.primary_keys(&Key::from("cy")).is_some());
    assert!(index.entries.primary_keys(&Key::from("ann")).is_none());
}

// =============================================================================
// Database Tests
// =============================================================================

#[test]
fn test_database_store_names_sorted() {
    let mut db = Database::new("library");
    db.create_store("zines", None, false);
    db.create_store("books", Some(KeyPath::from("isbn")), false);
    db.create_store("Maps", None, true);
    assert_eq!(db.store_names(), vec!["Maps", "books", "zines"]);
}

#[test]
fn test_database_create_index_over_existing_records() {
    let mut db = Database::new("people");
    let store = db.create_store("people", Some(KeyPath::from("id")), false);
    for (id, name) in [(1, "ann"), (2, "ann")] {
        db.store_mut(store)
            .unwrap()
            .store_record(common::person(id, name), Some(Key::from(id)), false, MAX_GENERATED_KEY)
            .unwrap();
    }
    let (_, outcome) = db.create_index(store, IndexData::new("by_name", KeyPath::from("name"), true, false));
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Constraint);

    let (_, outcome) = db.create_index(store, IndexData::new("loose", KeyPath::from("name"), false, false));
    assert!(outcome.is_ok());
    assert_eq!(db.store(store).unwrap().index_names(), vec!["by_name", "loose"]);
}
