//! Key paths
//!
//! A key path names the property (or list of properties) a key is read
//! from. Paths are identifiers joined by `.`; the empty path names the
//! value itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IdbError, Result};
use crate::key::{codec, Conversion, Key};
use crate::value::Value;

/// A key path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    /// A single path such as `"id"` or `"address.zip"`
    Path(String),
    /// A compound path producing an array key
    Sequence(Vec<String>),
}

/// Result of evaluating a key path against a value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Extracted {
    Key(Key),
    /// Some segment of the path does not exist
    Missing,
    /// The path resolved, but not to a valid key
    Invalid,
}

impl KeyPath {
    /// Whether the path is syntactically valid
    pub fn is_valid(&self) -> bool {
        match self {
            KeyPath::Path(path) => is_valid_path(path),
            KeyPath::Sequence(paths) => !paths.is_empty() && paths.iter().all(|p| is_valid_path(p)),
        }
    }

    /// Fail with SyntaxError unless the path is valid
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(IdbError::Syntax(format!("invalid key path: {:?}", self)))
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    pub(crate) fn is_empty_path(&self) -> bool {
        matches!(self, KeyPath::Path(p) if p.is_empty())
    }

    /// Evaluate the path against `value` and convert the result to a key
    pub(crate) fn extract(&self, value: &Value) -> Extracted {
        match self {
            KeyPath::Path(path) => match evaluate_path(value, path) {
                None => Extracted::Missing,
                Some(found) => match codec::convert_value_to_key(&found) {
                    Conversion::Valid(key) => Extracted::Key(key),
                    _ => Extracted::Invalid,
                },
            },
            KeyPath::Sequence(paths) => {
                let mut parts = Vec::with_capacity(paths.len());
                for path in paths {
                    match evaluate_path(value, path) {
                        Some(found) => parts.push(found),
                        None => return Extracted::Missing,
                    }
                }
                match codec::convert_value_to_key(&Value::array(parts)) {
                    Conversion::Valid(key) => Extracted::Key(key),
                    _ => Extracted::Invalid,
                }
            }
        }
    }

    /// Evaluate a single path without converting to a key
    pub(crate) fn evaluate(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::Path(path) => evaluate_path(value, path),
            KeyPath::Sequence(paths) => {
                let parts: Option<Vec<Value>> =
                    paths.iter().map(|p| evaluate_path(value, p)).collect();
                parts.map(Value::array)
            }
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Path(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Path(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(paths: Vec<String>) -> Self {
        KeyPath::Sequence(paths)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(paths: &[&str]) -> Self {
        KeyPath::Sequence(paths.iter().map(|p| p.to_string()).collect())
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| {
        c == '$' || c == '_' || c == '\u{200C}' || c == '\u{200D}' || c.is_alphanumeric()
    })
}

fn is_valid_path(path: &str) -> bool {
    path.is_empty() || path.split('.').all(is_valid_identifier)
}

fn evaluate_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let identifiers: Vec<&str> = path.split('.').collect();
    let mut current = value;
    for (i, identifier) in identifiers.iter().enumerate() {
        let last = i + 1 == identifiers.len();
        let length = match (current, *identifier) {
            (Value::String(s), "length") => s.encode_utf16().count(),
            (Value::Array(items), "length") => items.len(),
            (Value::Binary(data), "length") => data.bytes().len(),
            (Value::Object(map), name) => {
                current = map.get(name)?;
                continue;
            }
            _ => return None,
        };
        // Numbers have no properties, so `length` must be the final step.
        return last.then(|| Value::Number(length as f64));
    }
    Some(current.clone())
}

/// Whether a generated key could be stored into `value` at `path`
pub(crate) fn can_inject_key(value: &Value, path: &str) -> bool {
    let identifiers: Vec<&str> = path.split('.').collect();
    let Some((_, parents)) = identifiers.split_last() else {
        return false;
    };
    let mut current = value;
    for identifier in parents {
        let Value::Object(map) = current else {
            return false;
        };
        match map.get(*identifier) {
            Some(next) => current = next,
            None => return true,
        }
    }
    matches!(current, Value::Object(_))
}

/// Store `key` into `value` at `path`, creating intermediate objects
pub(crate) fn inject_key(value: &mut Value, path: &str, key: &Key) -> Result<()> {
    let identifiers: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = identifiers.split_last() else {
        return Err(IdbError::Data("cannot inject into an empty key path".to_string()));
    };
    let mut current = value;
    for identifier in parents {
        let Value::Object(map) = current else {
            return Err(IdbError::Data(format!(
                "cannot inject key: '{}' is not an object",
                identifier
            )));
        };
        current = map
            .entry(identifier.to_string())
            .or_insert_with(|| Value::Object(BTreeMap::new()));
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), Value::from(key.clone()));
            Ok(())
        }
        _ => Err(IdbError::Data(format!(
            "cannot inject key at '{}': parent is not an object",
            path
        ))),
    }
}
