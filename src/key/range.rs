//! Key ranges
//!
//! A key range is a lower/upper pair over the key order, each bound
//! optional and either open or closed.

use std::cmp::Ordering;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::error::{IdbError, Result};
use crate::value::Value;

use super::{codec, compare, Key};

/// An interval over the key order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// Range containing every key
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    /// Range containing exactly `key`
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Range between two keys.
    ///
    /// Fails with DataError when `lower > upper`, or when they are equal
    /// and either side is open.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Result<Self> {
        match compare(&lower, &upper) {
            Ordering::Greater => {
                return Err(IdbError::Data(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower, upper
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(IdbError::Data(format!(
                    "bounds are equal ({}) but the range is open",
                    lower
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether `key` lies inside the range
    pub fn includes(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            match compare(lower, key) {
                Ordering::Greater => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match compare(upper, key) {
                Ordering::Less => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {}
            }
        }
        true
    }

    pub(crate) fn lower_bound_ref(&self) -> Bound<&Key> {
        match &self.lower {
            None => Bound::Unbounded,
            Some(key) if self.lower_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
        }
    }

    pub(crate) fn upper_bound_ref(&self) -> Bound<&Key> {
        match &self.upper {
            None => Bound::Unbounded,
            Some(key) if self.upper_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
        }
    }
}

// =============================================================================
// Bound Arithmetic
// =============================================================================

/// The tighter of two lower bounds
pub(crate) fn max_lower<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (split(a), split(b)) {
        (None, _) => b,
        (_, None) => a,
        (Some((left, left_open)), Some((right, _))) => match compare(left, right) {
            Ordering::Greater => a,
            Ordering::Less => b,
            Ordering::Equal if left_open => a,
            Ordering::Equal => b,
        },
    }
}

/// The tighter of two upper bounds
pub(crate) fn min_upper<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (split(a), split(b)) {
        (None, _) => b,
        (_, None) => a,
        (Some((left, left_open)), Some((right, _))) => match compare(left, right) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal if left_open => a,
            Ordering::Equal => b,
        },
    }
}

/// Whether no key satisfies both bounds.
///
/// `BTreeMap::range` panics on inverted or doubly-excluded equal bounds,
/// so callers check this first.
pub(crate) fn is_empty_interval(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (split(lower), split(upper)) {
        (Some((l, l_open)), Some((u, u_open))) => match compare(l, u) {
            Ordering::Greater => true,
            Ordering::Equal => l_open || u_open,
            Ordering::Less => false,
        },
        _ => false,
    }
}

fn split(bound: Bound<&Key>) -> Option<(&Key, bool)> {
    match bound {
        Bound::Included(k) => Some((k, false)),
        Bound::Excluded(k) => Some((k, true)),
        Bound::Unbounded => None,
    }
}

// =============================================================================
// Queries
// =============================================================================

/// A query argument: either a key range or a value naming a single key.
///
/// `Undefined` and `Null` values stand for "every record" where the
/// operation allows it.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Value(Value),
    Range(KeyRange),
}

impl Query {
    /// Query matching every record
    pub fn all() -> Self {
        Query::Value(Value::Undefined)
    }

    /// Resolve into a key range
    pub(crate) fn into_range(self, null_disallowed: bool) -> Result<KeyRange> {
        match self {
            Query::Range(range) => Ok(range),
            Query::Value(value) if value.is_nullish() => {
                if null_disallowed {
                    Err(IdbError::Data("a key or key range is required".to_string()))
                } else {
                    Ok(KeyRange::unbounded())
                }
            }
            Query::Value(value) => Ok(KeyRange::only(codec::to_key(&value)?)),
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::all()
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Range(KeyRange::only(key))
    }
}

impl From<Value> for Query {
    fn from(value: Value) -> Self {
        Query::Value(value)
    }
}

impl From<i32> for Query {
    fn from(n: i32) -> Self {
        Query::Value(Value::from(n))
    }
}

impl From<f64> for Query {
    fn from(n: f64) -> Self {
        Query::Value(Value::from(n))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Value(Value::from(s))
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Query::Value(Value::from(s))
    }
}
