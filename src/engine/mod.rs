//! # LSM Engine Module
//!
//! The storage core: routes reads and writes across the memtable and the
//! on-disk SST levels, drives flushes and compaction, and rebuilds its
//! state from a directory scan on startup.
//!
//! ## Level invariants
//!
//! - **Level 0** — SSTs may overlap; the deque is ordered newest-first
//!   (larger sst id at the front). Lookups scan front-to-back and stop at
//!   the first table that answers.
//! - **Level ≥ 1** — SSTs are key-disjoint and the deque is sorted by
//!   `first_key` ascending, so a lookup binary-searches for the single
//!   candidate table.
//! - A level holding `level_ratio` tables is compacted into the next
//!   level before another table lands in it.
//!
//! ## Locking
//!
//! Three coarse locks, always in this order when nested: the flush mutex
//! (serializes flush/compaction/clear against each other), the memtable's
//! own two locks, then the level-map lock. Readers take only the last
//! two, shared. The level map is updated in one exclusive critical
//! section per flush or compaction, so readers observe old and new table
//! sets atomically.

pub mod utils;

mod compact;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::BlockCache;
use crate::config::{ConfigError, StoreConfig};
use crate::fileio::FileIoError;
use crate::iterators::{
    HeapIterator, IterError, SearchItem, StorageIterator, TwoMergeIterator,
};
use crate::memtable::{MemTable, MemTableError, MemTableWriteGuard};
use crate::sstable::iterator::KeyPredicate;
use crate::sstable::{
    parse_sst_filename, sst_path, SsTable, SsTableBuilder, SsTableError, SstIterator,
};

use utils::{Entry, TxnId};

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating in the memtable pipeline.
    #[error("memtable error: {0}")]
    MemTable(#[from] MemTableError),

    /// Error originating in the SST layer.
    #[error("SSTable error: {0}")]
    SsTable(#[from] SsTableError),

    /// Error surfaced while driving a merge cursor.
    #[error("iterator error: {0}")]
    Iter(#[from] IterError),

    /// File-primitive failure.
    #[error("file error: {0}")]
    File(#[from] FileIoError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Key or value the store cannot represent.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// Internal invariant violation (poisoned lock, missing table, …).
    #[error("internal error: {0}")]
    Internal(String),
}

fn poisoned() -> EngineError {
    EngineError::Internal("lock poisoned".into())
}

/// The full, user-facing merge: memtable layers on the left (winning
/// ties), all SST levels on the right.
pub type LsmIterator = TwoMergeIterator<HeapIterator, HeapIterator>;

/// Snapshot of engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Bytes buffered across the active and frozen memtables.
    pub memtable_bytes: usize,

    /// Frozen tables awaiting flush.
    pub frozen_count: usize,

    /// SST count per level, indexed from level 0.
    pub level_sst_counts: Vec<usize>,

    /// Block-cache hit rate so far.
    pub cache_hit_rate: f64,
}

pub(crate) struct LevelState {
    /// `level → deque of sst ids` (see the module docs for per-level
    /// ordering invariants).
    pub(crate) level_sst_ids: BTreeMap<usize, VecDeque<u64>>,

    /// All open tables by id.
    pub(crate) ssts: HashMap<u64, Arc<SsTable>>,

    /// Next id to assign; ids are never reused.
    pub(crate) next_sst_id: u64,

    /// Deepest level currently populated.
    pub(crate) cur_max_level: usize,
}

impl LevelState {
    pub(crate) fn ids(&self, level: usize) -> &VecDeque<u64> {
        static EMPTY: VecDeque<u64> = VecDeque::new();
        self.level_sst_ids.get(&level).unwrap_or(&EMPTY)
    }

    pub(crate) fn table(&self, sst_id: u64) -> Result<&Arc<SsTable>, EngineError> {
        self.ssts
            .get(&sst_id)
            .ok_or_else(|| EngineError::Internal(format!("sst {sst_id} missing from table map")))
    }
}

/// The LSM storage core.
///
/// Thread-safe behind `Arc`; the transaction layer and the public facade
/// compose around it.
pub struct Engine {
    data_dir: PathBuf,
    config: StoreConfig,
    memtable: MemTable,
    levels: RwLock<LevelState>,
    cache: Arc<BlockCache>,
    /// Serializes flush, compaction, and clear against each other.
    flush_lock: Mutex<()>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// Scans the directory for `sst_<id>.<level>` files, opens them, and
    /// rebuilds the level map: level 0 newest-first by id, deeper levels
    /// sorted by first key. Foreign files are ignored.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let data_dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let cache = Arc::new(BlockCache::new(
            config.block_cache_capacity,
            config.block_cache_k,
        ));

        let mut level_sst_ids: BTreeMap<usize, VecDeque<u64>> = BTreeMap::new();
        let mut ssts: HashMap<u64, Arc<SsTable>> = HashMap::new();
        let mut next_sst_id = 0u64;
        let mut cur_max_level = 0usize;

        for dir_entry in fs::read_dir(&data_dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some((sst_id, level)) = name.to_str().and_then(parse_sst_filename) else {
                continue;
            };
            let table = SsTable::open(sst_id, level, dir_entry.path(), Arc::clone(&cache))?;
            level_sst_ids.entry(level).or_default().push_back(sst_id);
            ssts.insert(sst_id, Arc::new(table));
            next_sst_id = next_sst_id.max(sst_id + 1);
            cur_max_level = cur_max_level.max(level);
        }

        for (&level, ids) in level_sst_ids.iter_mut() {
            if level == 0 {
                // Newest (largest id) at the front.
                let mut sorted: Vec<u64> = ids.iter().copied().collect();
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                *ids = sorted.into();
            } else {
                let mut sorted: Vec<u64> = ids.iter().copied().collect();
                sorted.sort_unstable_by(|a, b| {
                    let (Some(ta), Some(tb)) = (ssts.get(a), ssts.get(b)) else {
                        return std::cmp::Ordering::Equal;
                    };
                    ta.first_key().cmp(tb.first_key())
                });
                *ids = sorted.into();
            }
        }

        info!(
            dir = %data_dir.display(),
            tables = ssts.len(),
            max_level = cur_max_level,
            "engine opened"
        );

        Ok(Self {
            data_dir,
            memtable: MemTable::new(config.per_mem_limit),
            levels: RwLock::new(LevelState {
                level_sst_ids,
                ssts,
                next_sst_id,
                cur_max_level,
            }),
            cache,
            config,
            flush_lock: Mutex::new(()),
        })
    }

    /// Engine directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Store configuration in effect.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Takes the memtable's commit-time write guard — the transaction
    /// layer's exclusive critical section over both memtable locks.
    pub(crate) fn memtable_write_guard(&self) -> Result<MemTableWriteGuard<'_>, EngineError> {
        Ok(self.memtable.write_guard()?)
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Writes one version of `key`.
    ///
    /// Returns the flushed SST's max txn id when the write pushed the
    /// memtable past its global limit and forced a flush, 0 otherwise —
    /// the caller forwards a non-zero value to the flushed watermark.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, txn_id: TxnId) -> Result<TxnId, EngineError> {
        utils::validate_entry(&key, &value).map_err(EngineError::InvalidEntry)?;
        self.memtable.put(key, value, txn_id)?;
        self.maybe_flush()
    }

    /// Writes a batch of versions under one memtable lock acquisition.
    pub fn put_batch(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        txn_id: TxnId,
    ) -> Result<TxnId, EngineError> {
        for (key, value) in &entries {
            utils::validate_entry(key, value).map_err(EngineError::InvalidEntry)?;
        }
        self.memtable.put_batch(entries, txn_id)?;
        self.maybe_flush()
    }

    /// Records a deletion (tombstone write).
    pub fn remove(&self, key: Vec<u8>, txn_id: TxnId) -> Result<TxnId, EngineError> {
        self.put(key, Vec::new(), txn_id)
    }

    /// Records a batch of deletions.
    pub fn remove_batch(&self, keys: Vec<Vec<u8>>, txn_id: TxnId) -> Result<TxnId, EngineError> {
        let entries = keys.into_iter().map(|key| (key, Vec::new())).collect();
        self.put_batch(entries, txn_id)
    }

    fn maybe_flush(&self) -> Result<TxnId, EngineError> {
        if self.memtable.total_size()? >= self.config.total_mem_limit {
            self.flush()
        } else {
            Ok(0)
        }
    }

    /// Flushes the oldest frozen table (freezing the active one first if
    /// the queue is empty) into a new L0 SST.
    ///
    /// If level 0 is full, it is compacted down before the new table
    /// lands. Returns the flushed table's max txn id, or 0 when there
    /// was nothing to flush.
    pub fn flush(&self) -> Result<TxnId, EngineError> {
        let _flush = self.flush_lock.lock().map_err(|_| poisoned())?;

        {
            let mut state = self.levels.write().map_err(|_| poisoned())?;
            if state.ids(0).len() >= self.config.level_ratio {
                self.full_compact(&mut state, 0)?;
            }
        }

        let sst_id = {
            let mut state = self.levels.write().map_err(|_| poisoned())?;
            let id = state.next_sst_id;
            state.next_sst_id += 1;
            id
        };
        let path = sst_path(&self.data_dir, sst_id, 0);

        let table = match self.memtable.flush_oldest(
            SsTableBuilder::new(&self.config),
            sst_id,
            &path,
            Arc::clone(&self.cache),
        ) {
            Ok(table) => table,
            Err(MemTableError::NothingToFlush) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let max_txn = table.txn_range().1;
        let mut state = self.levels.write().map_err(|_| poisoned())?;
        state.level_sst_ids.entry(0).or_default().push_front(sst_id);
        state.ssts.insert(sst_id, Arc::new(table));
        debug!(sst_id, max_txn, "L0 table published");
        Ok(max_txn)
    }

    /// Flushes until the memtable pipeline is empty; returns the highest
    /// txn id that reached disk (0 when nothing moved).
    pub fn flush_all(&self) -> Result<TxnId, EngineError> {
        let mut max_txn = 0;
        while !self.memtable.is_empty()? {
            max_txn = max_txn.max(self.flush()?);
        }
        Ok(max_txn)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Newest version of `key` visible at `txn_id`, tombstones resolved
    /// to `None`.
    pub fn get(&self, key: &[u8], txn_id: TxnId) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self
            .get_entry(key, txn_id)?
            .filter(|entry| !entry.is_tombstone())
            .map(|entry| entry.value))
    }

    /// Batch point lookup, positionally matching the input keys.
    pub fn get_batch(
        &self,
        keys: &[Vec<u8>],
        txn_id: TxnId,
    ) -> Result<Vec<Option<Vec<u8>>>, EngineError> {
        keys.iter().map(|key| self.get(key, txn_id)).collect()
    }

    /// Newest visible version of `key` **including tombstones** — the
    /// transaction layer needs the writer's txn id for conflict checks.
    pub fn get_entry(&self, key: &[u8], txn_id: TxnId) -> Result<Option<Entry>, EngineError> {
        // 1. Memtable (active, then frozen). Any hit — tombstone
        //    included — is conclusive.
        if let Some(entry) = self.memtable.get(key, txn_id)? {
            return Ok(Some(entry));
        }

        // 2. SSTs.
        self.sst_get_entry(key, txn_id)
    }

    /// SST-only lookup (used directly by commit-time conflict checks,
    /// which have already inspected the memtable under its write guard).
    pub(crate) fn sst_get_entry(
        &self,
        key: &[u8],
        txn_id: TxnId,
    ) -> Result<Option<Entry>, EngineError> {
        let state = self.levels.read().map_err(|_| poisoned())?;

        // Level 0, newest first; the first table that answers wins.
        for sst_id in state.ids(0) {
            let table = state.table(*sst_id)?;
            if !table.key_within_range(key) {
                continue;
            }
            if let Some(entry) = table.get(key, txn_id)? {
                return Ok(Some(entry));
            }
        }

        // Deeper levels are disjoint: binary-search the one candidate.
        for level in 1..=state.cur_max_level {
            let ids = state.ids(level);
            if ids.is_empty() {
                continue;
            }
            let Some(sst_id) = Self::locate_in_level(ids, &state, key)? else {
                continue;
            };
            let table = state.table(sst_id)?;
            if let Some(entry) = table.get(key, txn_id)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Binary search over a disjoint level's deque (sorted by first key)
    /// for the table whose range contains `key`.
    fn locate_in_level(
        ids: &VecDeque<u64>,
        state: &LevelState,
        key: &[u8],
    ) -> Result<Option<u64>, EngineError> {
        let (mut low, mut high) = (0usize, ids.len());
        while low < high {
            let mid = low + (high - low) / 2;
            let table = state.table(ids[mid])?;
            if table.last_key() < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low < ids.len() {
            let table = state.table(ids[low])?;
            if table.first_key() <= key {
                return Ok(Some(ids[low]));
            }
        }
        Ok(None)
    }

    /// Highest txn id present in any SST — recovery uses it to re-seat
    /// the id allocator after a crash.
    pub fn max_sst_txn_id(&self) -> Result<TxnId, EngineError> {
        let state = self.levels.read().map_err(|_| poisoned())?;
        Ok(state
            .ssts
            .values()
            .map(|table| table.txn_range().1)
            .max()
            .unwrap_or(0))
    }

    // --------------------------------------------------------------------------------------------
    // Range iteration
    // --------------------------------------------------------------------------------------------

    /// Merged cursor over the whole store at snapshot `txn_id`.
    ///
    /// Tombstones pass through (wrap in a
    /// [`TombstoneFilter`](crate::iterators::TombstoneFilter) for a
    /// user-facing view). The cursor owns a snapshot taken at
    /// construction; later writes are not reflected.
    pub fn begin(&self, txn_id: TxnId) -> Result<LsmIterator, EngineError> {
        let mem_heap = HeapIterator::new(self.memtable.collect_items()?, txn_id);

        let state = self.levels.read().map_err(|_| poisoned())?;
        let mut items = Vec::new();
        for (&level, ids) in state.level_sst_ids.iter() {
            for sst_id in ids {
                let table = state.table(*sst_id)?;
                let iter = SstIterator::new(Arc::clone(table), txn_id)?;
                Self::drain_into_items(iter, *sst_id, level, &mut items)?;
            }
        }
        drop(state);

        let sst_heap = HeapIterator::new(items, txn_id);
        Ok(TwoMergeIterator::new(mem_heap, sst_heap)?)
    }

    /// Merged cursor over the contiguous key range matched by a monotone
    /// predicate (see
    /// [`SkipList::iters_monotone_predicate`](crate::skiplist::SkipList::iters_monotone_predicate)
    /// for the contract).
    pub fn iters_monotone_predicate(
        &self,
        txn_id: TxnId,
        pred: KeyPredicate,
    ) -> Result<LsmIterator, EngineError> {
        let mem_items = self.memtable.collect_items_monotone(|key| pred(key))?;
        let mem_heap = HeapIterator::new(mem_items, txn_id);

        let state = self.levels.read().map_err(|_| poisoned())?;
        let mut items = Vec::new();
        for (&level, ids) in state.level_sst_ids.iter() {
            for sst_id in ids {
                let table = state.table(*sst_id)?;
                if let Some(iter) =
                    SstIterator::new_predicate(Arc::clone(table), Arc::clone(&pred), txn_id)?
                {
                    Self::drain_into_items(iter, *sst_id, level, &mut items)?;
                }
            }
        }
        drop(state);

        let sst_heap = HeapIterator::new(items, txn_id);
        Ok(TwoMergeIterator::new(mem_heap, sst_heap)?)
    }

    fn drain_into_items(
        mut iter: SstIterator,
        sst_id: u64,
        level: usize,
        items: &mut Vec<SearchItem>,
    ) -> Result<(), EngineError> {
        while iter.is_valid() {
            items.push(SearchItem {
                key: iter.key().to_vec(),
                value: iter.value().to_vec(),
                txn_id: iter.txn_id(),
                idx: -(sst_id as i64),
                level,
            });
            iter.next()?;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Drops every table and memtable entry and deletes the SST files.
    /// The id allocator is not reset — ids stay monotone per directory.
    pub fn clear(&self) -> Result<(), EngineError> {
        let _flush = self.flush_lock.lock().map_err(|_| poisoned())?;
        self.memtable.clear()?;

        let mut state = self.levels.write().map_err(|_| poisoned())?;
        for (_, table) in state.ssts.drain() {
            if let Err(e) = table.del_sst() {
                warn!(error = %e, "failed to delete SST file during clear");
            }
        }
        state.level_sst_ids.clear();
        state.cur_max_level = 0;
        info!("engine cleared");
        Ok(())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let state = self.levels.read().map_err(|_| poisoned())?;
        let mut level_sst_counts = vec![0; state.cur_max_level + 1];
        for (&level, ids) in state.level_sst_ids.iter() {
            if level < level_sst_counts.len() {
                level_sst_counts[level] = ids.len();
            }
        }
        Ok(EngineStats {
            memtable_bytes: self.memtable.total_size()?,
            frozen_count: self.memtable.frozen_count()?,
            level_sst_counts,
            cache_hit_rate: self.cache.hit_rate(),
        })
    }
}
