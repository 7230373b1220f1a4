//! Key Module
//!
//! The canonical key type and its total order.
//!
//! ## Responsibilities
//! - Represent valid keys (number, date, string, binary, array)
//! - Define the total order used by every record store and index
//! - Convert dynamic values into keys (`codec`)
//! - Describe bounded intervals over the key order (`range`)
//!
//! ## Ordering
//! ```text
//! Number < Date < String < Binary < Array
//! ```
//! Within a type: numbers and dates compare numerically, strings by UTF-16
//! code unit, binaries by unsigned byte, arrays element-wise. When one
//! sequence is a prefix of the other, the shorter sorts first.

pub mod codec;
mod range;

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{IdbError, Result};

pub use codec::{to_key, try_to_key, Conversion};
pub use range::{KeyRange, Query};
pub(crate) use range::{is_empty_interval, max_lower, min_upper};

/// Largest distance from the epoch a date can hold, in milliseconds
pub const MAX_DATE_MS: f64 = 8.64e15;

/// Whether `ms` is the time value of a valid date
pub fn is_valid_date(ms: f64) -> bool {
    ms.is_finite() && ms.abs() <= MAX_DATE_MS
}

/// A valid key
///
/// Numbers are never NaN and dates are always valid; the codec, the
/// checked constructors and deserialization all reject anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "KeyRepr")]
pub enum Key {
    Number(f64),
    Date(f64),
    String(String),
    Binary(Bytes),
    Array(Vec<Key>),
}

impl Key {
    /// Number key, rejecting NaN
    pub fn number(n: f64) -> Result<Self> {
        if n.is_nan() {
            return Err(IdbError::Data("NaN is not a valid key".to_string()));
        }
        Ok(Key::Number(n))
    }

    /// Date key from epoch milliseconds, rejecting invalid dates
    pub fn date(ms: f64) -> Result<Self> {
        if !is_valid_date(ms) {
            return Err(IdbError::Data("invalid date is not a valid key".to_string()));
        }
        Ok(Key::Date(ms))
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Key::Binary(bytes.into())
    }

    pub fn array<I: IntoIterator<Item = Key>>(items: I) -> Self {
        Key::Array(items.into_iter().collect())
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Unchecked form read by `Deserialize`
#[derive(Deserialize)]
enum KeyRepr {
    Number(f64),
    Date(f64),
    String(String),
    Binary(Bytes),
    Array(Vec<Key>),
}

impl TryFrom<KeyRepr> for Key {
    type Error = IdbError;

    fn try_from(repr: KeyRepr) -> Result<Self> {
        match repr {
            KeyRepr::Number(n) => Key::number(n),
            KeyRepr::Date(ms) => Key::date(ms),
            KeyRepr::String(s) => Ok(Key::String(s)),
            KeyRepr::Binary(bytes) => Ok(Key::Binary(bytes)),
            // Elements went through this same check
            KeyRepr::Array(items) => Ok(Key::Array(items)),
        }
    }
}

/// Compare two keys
pub fn compare(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Number(x), Key::Number(y)) | (Key::Date(x), Key::Date(y)) => compare_numbers(*x, *y),
        (Key::String(x), Key::String(y)) => compare_strings(x, y),
        (Key::Binary(x), Key::Binary(y)) => x.as_ref().cmp(y.as_ref()),
        (Key::Array(x), Key::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare(left, right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => a.type_rank().cmp(&b.type_rank()),
    }
}

/// Numeric order with `-0 == 0`. A NaN built by hand sorts after every
/// number, so the order stays total.
fn compare_numbers(x: f64, y: f64) -> Ordering {
    x.partial_cmp(&y)
        .unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()))
}

/// Compare strings by UTF-16 code unit
pub fn compare_strings(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// Sort names in key order
pub(crate) fn sort_names(names: &mut [String]) {
    names.sort_by(|a, b| compare_strings(a, b));
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "Date({})", ms),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Key::Binary(bytes)
    }
}
