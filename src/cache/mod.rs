//! # Block Cache Module
//!
//! A shared, mutex-protected **LRU-K** cache of decoded blocks keyed by
//! `(sst_id, block_idx)`.
//!
//! ## Policy
//!
//! Two recency lists are maintained:
//!
//! - **cold** — entries seen fewer than `k` times. New blocks land here.
//! - **hot** — entries promoted on their `k`-th hit.
//!
//! Every hit moves the entry to the head of its list. Eviction takes the
//! tail of `cold` first and only falls back to the tail of `hot` when
//! `cold` is empty, so a burst of one-shot reads cannot flush the working
//! set of repeatedly-used blocks.
//!
//! Blocks are immutable, so the cache hands out shared handles and never
//! copies block bytes.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::block::Block;

/// Cache key: which block of which SST.
pub type CacheKey = (u64, usize);

struct CacheEntry {
    block: Arc<Block>,
    hits: usize,
}

struct CacheInner {
    map: HashMap<CacheKey, CacheEntry>,
    /// Keys seen fewer than `k` times; front = most recently touched.
    cold: VecDeque<CacheKey>,
    /// Keys promoted at the `k`-th hit; front = most recently touched.
    hot: VecDeque<CacheKey>,
    total_requests: u64,
    hit_requests: u64,
}

impl CacheInner {
    fn detach(&mut self, key: &CacheKey, hot: bool) {
        let list = if hot { &mut self.hot } else { &mut self.cold };
        if let Some(pos) = list.iter().position(|k| k == key) {
            list.remove(pos);
        }
    }

    /// Register one more hit and reposition the key accordingly.
    fn touch(&mut self, key: CacheKey, k: usize) {
        let Some(entry) = self.map.get_mut(&key) else {
            return;
        };
        entry.hits += 1;
        let hits = entry.hits;

        self.detach(&key, false);
        self.detach(&key, true);
        if hits < k {
            self.cold.push_front(key);
        } else {
            // The k-th access graduates the entry to the hot list.
            self.hot.push_front(key);
        }
    }

    fn evict_one(&mut self) {
        let victim = if let Some(key) = self.cold.pop_back() {
            key
        } else if let Some(key) = self.hot.pop_back() {
            key
        } else {
            return;
        };
        self.map.remove(&victim);
        trace!(sst_id = victim.0, block_idx = victim.1, "block cache eviction");
    }
}

/// Shared LRU-K cache of decoded SST blocks.
pub struct BlockCache {
    capacity: usize,
    k: usize,
    inner: Mutex<CacheInner>,
}

impl BlockCache {
    /// Creates a cache holding up to `capacity` blocks, promoting entries
    /// to the hot list on their `k`-th hit.
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            k: k.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                cold: VecDeque::new(),
                hot: VecDeque::new(),
                total_requests: 0,
                hit_requests: 0,
            }),
        }
    }

    /// Looks up a cached block. Counts toward the hit-rate metrics.
    pub fn get(&self, sst_id: u64, block_idx: usize) -> Option<Arc<Block>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_requests += 1;

        let key = (sst_id, block_idx);
        let block = inner.map.get(&key).map(|e| Arc::clone(&e.block))?;
        inner.hit_requests += 1;
        inner.touch(key, self.k);
        Some(block)
    }

    /// Inserts (or refreshes) a block, evicting if at capacity.
    pub fn put(&self, sst_id: u64, block_idx: usize, block: Arc<Block>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (sst_id, block_idx);

        if let Some(entry) = inner.map.get_mut(&key) {
            // Blocks are immutable; refreshing the handle only matters if
            // the same block was re-read concurrently by two missers.
            entry.block = block;
            inner.touch(key, self.k);
            return;
        }

        if inner.map.len() >= self.capacity {
            inner.evict_one();
        }

        inner.map.insert(key, CacheEntry { block, hits: 1 });
        inner.cold.push_front(key);
    }

    /// Drops every cached block belonging to `sst_id` — called when an SST
    /// file is deleted after compaction.
    pub fn evict_sst(&self, sst_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.retain(|key, _| key.0 != sst_id);
        inner.cold.retain(|key| key.0 != sst_id);
        inner.hot.retain(|key| key.0 != sst_id);
    }

    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.total_requests == 0 {
            0.0
        } else {
            inner.hit_requests as f64 / inner.total_requests as f64
        }
    }

    /// `(total_requests, hit_requests)` counters.
    pub fn metrics(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.total_requests, inner.hit_requests)
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
