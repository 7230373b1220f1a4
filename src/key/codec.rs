//! Key codec
//!
//! Converts dynamic values into keys. Two entry points exist: `to_key`
//! fails with DataError and is used on write and lookup paths; `try_to_key`
//! never fails and is used to probe whether a value could serve as a key.

use std::collections::BTreeSet;

use crate::error::{IdbError, Result};
use crate::value::Value;

use super::{is_valid_date, Key};

/// Outcome of converting a value to a key
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Valid(Key),
    /// The value's type can never be a key (object, bool, null, ...)
    InvalidType,
    /// The type could be a key but this value cannot (NaN, hole, ...)
    InvalidValue,
}

impl Conversion {
    pub fn into_key(self) -> Option<Key> {
        match self {
            Conversion::Valid(key) => Some(key),
            _ => None,
        }
    }
}

/// Convert a value to a key
pub fn convert_value_to_key(input: &Value) -> Conversion {
    match input {
        Value::Number(n) => {
            if n.is_nan() {
                Conversion::InvalidValue
            } else {
                Conversion::Valid(Key::Number(*n))
            }
        }
        Value::Date(ms) => {
            if !is_valid_date(*ms) {
                Conversion::InvalidValue
            } else {
                Conversion::Valid(Key::Date(*ms))
            }
        }
        Value::String(s) => Conversion::Valid(Key::String(s.clone())),
        Value::Binary(data) => {
            if data.is_detached() {
                Conversion::InvalidValue
            } else {
                Conversion::Valid(Key::Binary(data.to_bytes()))
            }
        }
        // Values own their elements, so an array can never reach itself.
        Value::Array(slots) => {
            let mut keys = Vec::with_capacity(slots.len());
            for slot in slots {
                let Some(item) = slot else {
                    return Conversion::InvalidValue;
                };
                match convert_value_to_key(item) {
                    Conversion::Valid(key) => keys.push(key),
                    _ => return Conversion::InvalidValue,
                }
            }
            Conversion::Valid(Key::Array(keys))
        }
        _ => Conversion::InvalidType,
    }
}

/// Convert a value to a key, failing with DataError
pub fn to_key(input: &Value) -> Result<Key> {
    match convert_value_to_key(input) {
        Conversion::Valid(key) => Ok(key),
        Conversion::InvalidType => Err(IdbError::Data(
            "value is not a valid key type".to_string(),
        )),
        Conversion::InvalidValue => Err(IdbError::Data("value is not a valid key".to_string())),
    }
}

/// Convert a value to a key without raising
pub fn try_to_key(input: &Value) -> Option<Key> {
    convert_value_to_key(input).into_key()
}

/// Whether a value could be used as a single-key query
pub fn is_potentially_valid_key(input: &Value) -> bool {
    try_to_key(input).is_some()
}

/// Keys a multiEntry index derives from an evaluated key path value.
///
/// Arrays fan out into their distinct valid elements; nested arrays stay
/// whole. Anything else yields at most one key.
pub(crate) fn multi_entry_keys(input: &Value) -> Vec<Key> {
    match input {
        Value::Array(slots) => {
            let distinct: BTreeSet<Key> = slots
                .iter()
                .flatten()
                .filter_map(try_to_key)
                .collect();
            distinct.into_iter().collect()
        }
        other => try_to_key(other).into_iter().collect(),
    }
}
