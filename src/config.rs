//! Engine configuration.
//!
//! All tunables are carried in an explicit [`StoreConfig`] value handed to
//! the engine constructor — there is no process-wide configuration state.

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A size or ratio field is zero or otherwise out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunable constants for a store instance.
///
/// Passed to [`Db::open`](crate::db::Db::open); the defaults mirror the
/// production deployment values and are deliberately conservative. Tests
/// shrink the byte limits to force freezes, flushes, and compactions early.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Max size of a single (active) skip list before it is frozen.
    pub per_mem_limit: usize,

    /// Max combined size of the active plus frozen skip lists before a
    /// flush to level 0 is forced.
    pub total_mem_limit: usize,

    /// Target encoded size of one SST data block.
    pub block_size: usize,

    /// SSTs per level before the level is compacted into the next one.
    /// Also the growth factor of per-level SST sizing.
    pub level_ratio: usize,

    /// Max number of blocks held by the shared block cache.
    pub block_cache_capacity: usize,

    /// Hits needed before a cache entry is promoted to the hot list.
    pub block_cache_k: usize,

    /// Expected number of keys used to size each SST's bloom filter.
    pub bloom_expected_entries: usize,

    /// Target false-positive rate for the bloom filter.
    pub bloom_fpr: f64,

    /// WAL segment size; the log rotates to `wal.<seq+1>` past this.
    pub wal_segment_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            per_mem_limit: 4 * 1024 * 1024,
            total_mem_limit: 64 * 1024 * 1024,
            block_size: 32 * 1024,
            level_ratio: 4,
            block_cache_capacity: 1024,
            block_cache_k: 8,
            bloom_expected_entries: 65536,
            bloom_fpr: 0.1,
            wal_segment_size: 4 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Validates field ranges, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_mem_limit == 0 {
            return Err(ConfigError::Invalid("per_mem_limit must be > 0".into()));
        }
        if self.total_mem_limit < self.per_mem_limit {
            return Err(ConfigError::Invalid(
                "total_mem_limit must be >= per_mem_limit".into(),
            ));
        }
        // Entry offsets within a block are u16.
        if self.block_size == 0 || self.block_size > u16::MAX as usize {
            return Err(ConfigError::Invalid(
                "block_size must be in 1..=65535".into(),
            ));
        }
        if self.level_ratio < 2 {
            return Err(ConfigError::Invalid("level_ratio must be >= 2".into()));
        }
        if self.block_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "block_cache_capacity must be > 0".into(),
            ));
        }
        if self.block_cache_k == 0 {
            return Err(ConfigError::Invalid("block_cache_k must be > 0".into()));
        }
        if self.bloom_expected_entries == 0 {
            return Err(ConfigError::Invalid(
                "bloom_expected_entries must be > 0".into(),
            ));
        }
        if !(self.bloom_fpr > 0.0 && self.bloom_fpr < 1.0) {
            return Err(ConfigError::Invalid(
                "bloom_fpr must be in (0.0, 1.0)".into(),
            ));
        }
        if self.wal_segment_size == 0 {
            return Err(ConfigError::Invalid("wal_segment_size must be > 0".into()));
        }
        Ok(())
    }
}
