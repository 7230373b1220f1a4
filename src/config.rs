//! Configuration for idbkit
//!
//! Centralized configuration with sensible defaults.

use serde::{Deserialize, Serialize};

/// Largest integer a key generator may hand out (2^53)
pub const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Main configuration for a [`DatabaseRegistry`](crate::DatabaseRegistry)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Key Generator Configuration
    // -------------------------------------------------------------------------
    /// Largest key a store's key generator may produce, at most
    /// [`MAX_GENERATED_KEY`]. Generating past this fails with ConstraintError.
    pub key_generator_limit: u64,

    // -------------------------------------------------------------------------
    // Event Loop Configuration
    // -------------------------------------------------------------------------
    /// Max tasks executed by a single `run_until_idle` call
    pub max_tasks_per_run: usize,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Durability reported by transactions that did not ask for one
    pub default_durability: Durability,
}

/// Durability hint carried by a transaction.
///
/// The engine is memory resident, so the hint is recorded and reported
/// but does not change commit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Durability {
    #[default]
    Default,
    Strict,
    Relaxed,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_generator_limit: MAX_GENERATED_KEY,
            max_tasks_per_run: 1_000_000,
            default_durability: Durability::Default,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the largest key a key generator may produce; capped at
    /// [`MAX_GENERATED_KEY`]
    pub fn key_generator_limit(mut self, limit: u64) -> Self {
        self.config.key_generator_limit = limit.min(MAX_GENERATED_KEY);
        self
    }

    /// Set the task budget for one `run_until_idle` call
    pub fn max_tasks_per_run(mut self, count: usize) -> Self {
        self.config.max_tasks_per_run = count;
        self
    }

    /// Set the durability used when a transaction does not specify one
    pub fn default_durability(mut self, durability: Durability) -> Self {
        self.config.default_durability = durability;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
