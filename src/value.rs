//! Stored values
//!
//! Dynamic values handed to the engine by the embedding layer. The engine
//! treats them as opaque payloads except when it evaluates key paths
//! against them or converts them into keys.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::key::Key;

/// A dynamic value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Milliseconds since the epoch; NaN is an invalid date
    Date(f64),
    String(String),
    Binary(BinaryData),
    /// Array slots; `None` marks a hole
    Array(Vec<Option<Value>>),
    Object(BTreeMap<String, Value>),
}

/// Where a binary value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryKind {
    /// A plain buffer
    Buffer,
    /// A typed view over a buffer
    View,
    /// A view over a shared buffer (never detached)
    SharedView,
}

/// Binary data plus its detachment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryData {
    kind: BinaryKind,
    bytes: Bytes,
    detached: bool,
}

impl BinaryData {
    pub fn new(kind: BinaryKind, bytes: impl Into<Bytes>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
            detached: false,
        }
    }

    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Self::new(BinaryKind::Buffer, bytes)
    }

    pub fn kind(&self) -> BinaryKind {
        self.kind
    }

    /// Visible bytes; empty once detached
    pub fn bytes(&self) -> &[u8] {
        if self.detached {
            &[]
        } else {
            &self.bytes
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Detach the underlying buffer. Shared buffers cannot be detached.
    pub fn detach(&mut self) {
        if self.kind != BinaryKind::SharedView {
            self.detached = true;
        }
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

impl Value {
    /// Build an object from `(name, value)` pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a dense array
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(items.into_iter().map(Some).collect())
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Value::Binary(BinaryData::buffer(bytes))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Undefined or null
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Look up an own property of an object
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Number(n) => Value::Number(n),
            Key::Date(ms) => Value::Date(ms),
            Key::String(s) => Value::String(s),
            Key::Binary(b) => Value::Binary(BinaryData::buffer(b)),
            Key::Array(items) => Value::array(items.into_iter().map(Value::from)),
        }
    }
}

impl From<&Key> for Value {
    fn from(key: &Key) -> Self {
        Value::from(key.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
