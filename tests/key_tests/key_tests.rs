//! Tests for keys, key ranges and key paths
//!
//! These tests verify:
//! - The total order across and within key types
//! - Value to key conversion and its failures
//! - Key range construction and membership
//! - Key path validity

#[path = "../common/mod.rs"]
mod common;

use std::cmp::Ordering;

use idbkit::key::{compare, to_key, try_to_key};
use idbkit::{ErrorKind, Key, KeyPath, KeyRange, Value};
use serde_json::json;

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_type_order() {
    let ascending = vec![
        Key::Number(f64::NEG_INFINITY),
        Key::Number(0.0),
        Key::Number(f64::INFINITY),
        Key::Date(-1.0),
        Key::String(String::new()),
        Key::String("a".to_string()),
        Key::binary(Vec::<u8>::new()),
        Key::binary(vec![0u8]),
        Key::array(vec![]),
        Key::array(vec![Key::Number(0.0)]),
    ];
    for pair in ascending.windows(2) {
        assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
    }
}

#[test]
fn test_strings_compare_by_code_unit() {
    // U+FF5E is one UTF-16 unit; U+1F600 is a surrogate pair starting 0xD83D
    let high = Key::from("\u{ff5e}");
    let astral = Key::from("\u{1f600}");
    assert_eq!(compare(&astral, &high), Ordering::Less);
    assert_eq!(compare(&Key::from("B"), &Key::from("a")), Ordering::Less);
}

#[test]
fn test_array_prefix_sorts_first() {
    let short = Key::array(vec![Key::from(1), Key::from("x")]);
    let long = Key::array(vec![Key::from(1), Key::from("x"), Key::from(0)]);
    assert_eq!(compare(&short, &long), Ordering::Less);
    assert_eq!(compare(&long, &long.clone()), Ordering::Equal);
}

#[test]
fn test_binary_compares_unsigned() {
    assert_eq!(
        compare(&Key::binary(vec![0x7fu8]), &Key::binary(vec![0x80u8])),
        Ordering::Less
    );
}

#[test]
fn test_registry_cmp() {
    let registry = common::registry();
    assert_eq!(registry.cmp(1, "1").unwrap(), Ordering::Less);
    assert_eq!(registry.cmp("b", "a").unwrap(), Ordering::Greater);
    let err = registry.cmp(Value::Bool(true), 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

// =============================================================================
// Conversion Tests
// =============================================================================

#[test]
fn test_invalid_values_are_rejected() {
    for value in [
        Value::Undefined,
        Value::Null,
        Value::Bool(false),
        Value::Number(f64::NAN),
        Value::Date(f64::NAN),
        Value::Date(f64::INFINITY),
        Value::Date(-8.64e15 - 1.0),
        Value::object([("a", Value::from(1))]),
        Value::Array(vec![Some(Value::from(1)), None]),
        Value::array(vec![Value::from(1), Value::Null]),
    ] {
        assert!(try_to_key(&value).is_none(), "{:?} should not convert", value);
        assert_eq!(to_key(&value).unwrap_err().kind(), ErrorKind::Data);
    }
}

#[test]
fn test_nested_arrays_convert() {
    let value = Value::array(vec![
        Value::from(1),
        Value::array(vec![Value::from("a"), Value::Date(5.0)]),
    ]);
    let key = to_key(&value).unwrap();
    assert_eq!(
        key,
        Key::array(vec![
            Key::from(1),
            Key::array(vec![Key::from("a"), Key::Date(5.0)])
        ])
    );
}

#[test]
fn test_nan_constructors_fail() {
    assert!(Key::number(f64::NAN).is_err());
    assert!(Key::date(f64::NAN).is_err());
    assert!(Key::date(f64::NEG_INFINITY).is_err());
    assert!(Key::date(8.64e15).is_ok());
    assert!(Key::number(-0.0).is_ok());
    assert!(Key::number(f64::INFINITY).is_ok());
}

#[test]
fn test_deserialize_checks_keys() {
    let key: Key = serde_json::from_value(json!({
        "Array": [{ "Number": 1.0 }, { "Date": 5.0 }]
    }))
    .unwrap();
    assert_eq!(key, Key::array(vec![Key::from(1), Key::date(5.0).unwrap()]));

    assert!(serde_json::from_value::<Key>(json!({ "Date": 1e16 })).is_err());
    assert!(serde_json::from_value::<Key>(json!({ "Array": [{ "Date": 1e16 }] })).is_err());
}

#[test]
fn test_hand_built_nan_keeps_order_total() {
    let nan = Key::Number(f64::NAN);
    assert_eq!(compare(&nan, &nan), Ordering::Equal);
    assert_eq!(compare(&nan, &Key::Number(f64::INFINITY)), Ordering::Greater);
    assert_eq!(compare(&Key::Number(1.0), &nan), Ordering::Less);
    assert_eq!(compare(&nan, &Key::Date(0.0)), Ordering::Less);
    assert_eq!(compare(&Key::Number(-0.0), &Key::Number(0.0)), Ordering::Equal);
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_bound_rejects_inverted_range() {
    let err = KeyRange::bound(Key::from(5), Key::from(1), false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn test_bound_rejects_open_single_point() {
    assert!(KeyRange::bound(Key::from(1), Key::from(1), true, false).is_err());
    assert!(KeyRange::bound(Key::from(1), Key::from(1), false, false).is_ok());
}

#[test]
fn test_range_includes() {
    let range = KeyRange::bound(Key::from(1), Key::from(5), true, false).unwrap();
    assert!(!range.includes(&Key::from(1)));
    assert!(range.includes(&Key::from(2)));
    assert!(range.includes(&Key::from(5)));
    assert!(!range.includes(&Key::from("3")));

    let only = KeyRange::only(Key::from("x"));
    assert!(only.includes(&Key::from("x")));
    assert!(!only.includes(&Key::from("y")));

    let lower = KeyRange::lower_bound(Key::from(10), false);
    assert!(lower.includes(&Key::from("anything")));
    assert!(!lower.includes(&Key::from(9)));
}

// =============================================================================
// Key Path Tests
// =============================================================================

#[test]
fn test_key_path_validity() {
    assert!(KeyPath::from("").is_valid());
    assert!(KeyPath::from("id").is_valid());
    assert!(KeyPath::from("address.zip").is_valid());
    assert!(KeyPath::from(vec!["a", "b.c"]).is_valid());

    assert!(!KeyPath::from("a..b").is_valid());
    assert!(!KeyPath::from("1abc").is_valid());
    assert!(!KeyPath::from(" id").is_valid());
    assert!(!KeyPath::Sequence(vec![]).is_valid());
}
