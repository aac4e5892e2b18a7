use tracing_subscriber::EnvFilter;

use crate::config::StoreConfig;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call repeatedly — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config that keeps everything in memory — no freezes, no flushes.
pub fn memtable_only_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        per_mem_limit: 1 << 20,
        total_mem_limit: 64 << 20,
        block_size: 4096,
        level_ratio: 4,
        block_cache_capacity: 64,
        block_cache_k: 2,
        bloom_expected_entries: 1024,
        bloom_fpr: 0.1,
        wal_segment_size: 1 << 20,
    }
}

/// Config with tiny limits so freezes, flushes, and compactions trigger
/// after a handful of writes.
pub fn tiny_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        per_mem_limit: 256,
        total_mem_limit: 1024,
        block_size: 512,
        level_ratio: 4,
        block_cache_capacity: 64,
        block_cache_k: 2,
        bloom_expected_entries: 256,
        bloom_fpr: 0.1,
        wal_segment_size: 1 << 16,
    }
}
