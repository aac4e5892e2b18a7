//! # MemTable Module
//!
//! The sole entry point for writes: an **active** skip list taking new
//! entries plus an insertion-ordered queue of **frozen** (immutable) skip
//! lists awaiting flush.
//!
//! ## Design Invariants
//!
//! - A frozen table is never mutated again.
//! - The frozen queue is ordered newest-first; the tail is the next flush
//!   candidate.
//! - `total_size = active_size + Σ frozen_sizes`.
//! - A tombstone found in any table is a **conclusive** "deleted" answer;
//!   callers must not consult SSTs for that key.
//!
//! ## Locking discipline
//!
//! Two independent reader-writer locks: `active` (the current table) and
//! `frozen` (the queue). Whenever both are needed they are acquired in
//! that fixed order — active before frozen — so writers and the flush
//! path cannot deadlock. The commit path takes both exclusively through
//! [`MemTableWriteGuard`], which enforces the ordering by construction.

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::cache::BlockCache;
use crate::engine::utils::{Entry, TxnId};
use crate::iterators::SearchItem;
use crate::skiplist::SkipList;
use crate::sstable::{SsTable, SsTableBuilder, SsTableError};

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemTableError {
    /// Flush requested with no data anywhere in the pipeline.
    #[error("nothing to flush")]
    NothingToFlush,

    /// Building the flush target failed.
    #[error("SSTable error: {0}")]
    SsTable(#[from] SsTableError),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

fn poisoned() -> MemTableError {
    MemTableError::Internal("RwLock poisoned".into())
}

/// Active + frozen skip-list pipeline.
pub struct MemTable {
    /// The table taking writes. Lock order: this before `frozen`.
    active: RwLock<SkipList>,

    /// Frozen tables, newest at the front, oldest (next to flush) at the
    /// back.
    frozen: RwLock<VecDeque<SkipList>>,

    /// Size at which the active table is frozen.
    per_table_limit: usize,
}

impl MemTable {
    /// Creates an empty pipeline; the active table freezes once it holds
    /// roughly `per_table_limit` bytes.
    pub fn new(per_table_limit: usize) -> Self {
        Self {
            active: RwLock::new(SkipList::new()),
            frozen: RwLock::new(VecDeque::new()),
            per_table_limit,
        }
    }

    /// Inserts one entry, freezing the active table afterwards if it
    /// crossed the per-table limit.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, txn_id: TxnId) -> Result<(), MemTableError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        active.put(key, value, txn_id);
        if active.size_bytes() >= self.per_table_limit {
            self.freeze_locked(&mut active)?;
        }
        Ok(())
    }

    /// Inserts a batch under a single lock acquisition.
    pub fn put_batch(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        txn_id: TxnId,
    ) -> Result<(), MemTableError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        for (key, value) in entries {
            active.put(key, value, txn_id);
        }
        if active.size_bytes() >= self.per_table_limit {
            self.freeze_locked(&mut active)?;
        }
        Ok(())
    }

    /// Records a deletion as a tombstone entry.
    pub fn remove(&self, key: Vec<u8>, txn_id: TxnId) -> Result<(), MemTableError> {
        self.put(key, Vec::new(), txn_id)
    }

    /// Finds the newest version of `key` visible at `txn_id`, searching
    /// the active table first, then the frozen queue newest-to-oldest.
    ///
    /// A returned tombstone (empty value) means "deleted here" — callers
    /// stop searching older layers.
    pub fn get(&self, key: &[u8], txn_id: TxnId) -> Result<Option<Entry>, MemTableError> {
        {
            let active = self.active.read().map_err(|_| poisoned())?;
            let cursor = active.get(key, txn_id);
            if let Some(entry) = cursor.entry() {
                return Ok(Some(entry));
            }
        }

        let frozen = self.frozen.read().map_err(|_| poisoned())?;
        for table in frozen.iter() {
            if let Some(entry) = table.get(key, txn_id).entry() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Moves the active table to the front of the frozen queue, replacing
    /// it with a fresh one. Requires the active write lock; acquires the
    /// frozen write lock (respecting the fixed order).
    fn freeze_locked(&self, active: &mut RwLockWriteGuard<'_, SkipList>) -> Result<(), MemTableError> {
        if active.is_empty() {
            return Ok(());
        }
        let mut frozen = self.frozen.write().map_err(|_| poisoned())?;
        let full = std::mem::take(&mut **active);
        debug!(
            bytes = full.size_bytes(),
            entries = full.len(),
            queued = frozen.len() + 1,
            "active table frozen"
        );
        frozen.push_front(full);
        Ok(())
    }

    /// Freezes the active table if it holds any data.
    pub fn freeze_active(&self) -> Result<(), MemTableError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        self.freeze_locked(&mut active)
    }

    /// Flushes the **oldest** frozen table into a new SST.
    ///
    /// With an empty queue but a non-empty active table, the active table
    /// is frozen first so there is always something to flush. The table
    /// is only removed from the queue once the file is durably built.
    pub fn flush_oldest(
        &self,
        builder: SsTableBuilder,
        sst_id: u64,
        path: impl AsRef<Path>,
        cache: Arc<BlockCache>,
    ) -> Result<SsTable, MemTableError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        let mut frozen = self.frozen.write().map_err(|_| poisoned())?;

        if frozen.is_empty() {
            if active.is_empty() {
                return Err(MemTableError::NothingToFlush);
            }
            frozen.push_front(std::mem::take(&mut *active));
        }
        drop(active);

        let oldest = frozen.back().ok_or(MemTableError::NothingToFlush)?;
        let mut builder = builder;
        for entry in oldest.flush() {
            builder.add(&entry.key, &entry.value, entry.txn_id)?;
        }
        let table = builder.build(sst_id, 0, path, cache)?;

        let flushed = frozen.pop_back().ok_or_else(|| {
            MemTableError::Internal("frozen queue drained during flush".into())
        })?;
        info!(
            sst_id,
            entries = flushed.len(),
            bytes = flushed.size_bytes(),
            txn_range = ?table.txn_range(),
            "frozen table flushed to L0"
        );
        Ok(table)
    }

    /// `active_size + Σ frozen_sizes`.
    pub fn total_size(&self) -> Result<usize, MemTableError> {
        let active = self.active.read().map_err(|_| poisoned())?;
        let frozen = self.frozen.read().map_err(|_| poisoned())?;
        Ok(active.size_bytes() + frozen.iter().map(SkipList::size_bytes).sum::<usize>())
    }

    /// Whether no table holds any entry.
    pub fn is_empty(&self) -> Result<bool, MemTableError> {
        let active = self.active.read().map_err(|_| poisoned())?;
        let frozen = self.frozen.read().map_err(|_| poisoned())?;
        Ok(active.is_empty() && frozen.iter().all(SkipList::is_empty))
    }

    /// Number of frozen tables awaiting flush.
    pub fn frozen_count(&self) -> Result<usize, MemTableError> {
        Ok(self.frozen.read().map_err(|_| poisoned())?.len())
    }

    /// Drops every table.
    pub fn clear(&self) -> Result<(), MemTableError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        let mut frozen = self.frozen.write().map_err(|_| poisoned())?;
        active.clear();
        frozen.clear();
        Ok(())
    }

    /// Snapshots **every version in every table** as merge candidates,
    /// tagged 0 for the active table and 1.. for frozen tables newest
    /// first (smaller tag = newer source).
    pub fn collect_items(&self) -> Result<Vec<SearchItem>, MemTableError> {
        let active = self.active.read().map_err(|_| poisoned())?;
        let frozen = self.frozen.read().map_err(|_| poisoned())?;

        let mut items = Vec::new();
        for entry in active.flush() {
            items.push(Self::item(entry, 0));
        }
        for (age, table) in frozen.iter().enumerate() {
            for entry in table.flush() {
                items.push(Self::item(entry, age as i64 + 1));
            }
        }
        trace!(candidates = items.len(), "memtable snapshot collected");
        Ok(items)
    }

    /// Like [`MemTable::collect_items`], restricted to the contiguous key
    /// range matched by a monotone predicate.
    pub fn collect_items_monotone<F>(&self, pred: F) -> Result<Vec<SearchItem>, MemTableError>
    where
        F: Fn(&[u8]) -> std::cmp::Ordering,
    {
        let active = self.active.read().map_err(|_| poisoned())?;
        let frozen = self.frozen.read().map_err(|_| poisoned())?;

        let mut items = Vec::new();
        let mut collect = |table: &SkipList, tag: i64| {
            if let Some((mut begin, end)) = table.iters_monotone_predicate(&pred) {
                while !begin.same_position(&end) {
                    if let Some(entry) = begin.entry() {
                        items.push(Self::item(entry, tag));
                    }
                    begin.advance();
                }
            }
        };

        collect(&active, 0);
        for (age, table) in frozen.iter().enumerate() {
            collect(table, age as i64 + 1);
        }
        Ok(items)
    }

    fn item(entry: Entry, tag: i64) -> SearchItem {
        SearchItem {
            key: entry.key,
            value: entry.value,
            txn_id: entry.txn_id,
            idx: tag,
            level: 0,
        }
    }

    /// Takes both locks exclusively for a commit-time critical section.
    pub fn write_guard(&self) -> Result<MemTableWriteGuard<'_>, MemTableError> {
        let active = self.active.write().map_err(|_| poisoned())?;
        let frozen = self.frozen.write().map_err(|_| poisoned())?;
        Ok(MemTableWriteGuard { active, frozen })
    }
}

/// Both memtable locks held exclusively, in the fixed order.
///
/// The transaction commit path uses this to make its conflict check and
/// its writes one atomic step: no other writer can slip a conflicting
/// entry in between.
pub struct MemTableWriteGuard<'a> {
    active: RwLockWriteGuard<'a, SkipList>,
    frozen: RwLockWriteGuard<'a, VecDeque<SkipList>>,
}

impl MemTableWriteGuard<'_> {
    /// Newest version of `key` across all tables (id 0 = no filtering).
    pub fn get(&self, key: &[u8], txn_id: TxnId) -> Option<Entry> {
        if let Some(entry) = self.active.get(key, txn_id).entry() {
            return Some(entry);
        }
        for table in self.frozen.iter() {
            if let Some(entry) = table.get(key, txn_id).entry() {
                return Some(entry);
            }
        }
        None
    }

    /// Writes into the active table.
    ///
    /// No freeze check happens here — the table may briefly exceed its
    /// limit; the next regular `put` freezes it.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, txn_id: TxnId) {
        self.active.put(key, value, txn_id);
    }
}
