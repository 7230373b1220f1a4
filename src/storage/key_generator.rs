//! Key generator
//!
//! Per-store monotonic counter backing `autoIncrement` primary keys.
//! Limits above [`MAX_GENERATED_KEY`] are treated as that value, so the
//! counter never exceeds 2^53 + 1.

use crate::config::MAX_GENERATED_KEY;
use crate::error::{IdbError, Result};
use crate::key::Key;

/// Monotonic key source for one object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    current: u64,
}

impl KeyGenerator {
    /// Create a generator whose first key is 1
    pub fn new() -> Self {
        Self { current: 1 }
    }

    /// Next key the generator would hand out
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Hand out the next key.
    ///
    /// Fails with ConstraintError once the counter has passed `limit`.
    pub fn generate(&mut self, limit: u64) -> Result<Key> {
        let limit = limit.min(MAX_GENERATED_KEY);
        if self.current > limit {
            return Err(IdbError::Constraint(format!(
                "key generator exhausted (limit {})",
                limit
            )));
        }
        let key = self.current;
        self.current += 1;
        Ok(Key::Number(key as f64))
    }

    /// Advance past an explicitly supplied key.
    ///
    /// Only number keys move the counter, and never backwards.
    pub fn observe(&mut self, key: &Key, limit: u64) {
        let Key::Number(n) = key else {
            return;
        };
        let limit = limit.min(MAX_GENERATED_KEY);
        let value = n.min(limit as f64).floor();
        if value >= self.current as f64 {
            self.current = value as u64 + 1;
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
