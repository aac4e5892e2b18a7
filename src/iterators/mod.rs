//! # Iterator Module
//!
//! The merge machinery every read path is assembled from:
//!
//! - [`StorageIterator`] — the uniform forward-cursor contract.
//! - [`HeapIterator`] — k-way merge of versioned entries collected from
//!   many sources, yielding the newest visible version per key.
//! - [`TwoMergeIterator`] — binary merge where the left child wins ties
//!   (memtable over SSTs; upper level over lower during compaction).
//! - [`ConcatIterator`] — sequential pass over a run of key-disjoint SSTs.
//! - [`TombstoneFilter`] — outermost wrapper that hides deleted keys from
//!   user-facing scans. Compaction consumes the raw merge instead, so
//!   tombstones always survive to the output tables.
//!
//! All cursors are forward-only and single-pass.


use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use thiserror::Error;

use crate::engine::utils::{is_visible, TxnId};
use crate::sstable::{SsTable, SsTableError, SstIterator};

/// Errors surfaced while advancing a cursor.
#[derive(Debug, Error)]
pub enum IterError {
    /// Reading the next block or table failed.
    #[error("SSTable error: {0}")]
    SsTable(#[from] SsTableError),
}

/// Uniform forward-cursor contract.
///
/// A valid cursor sits on one entry; `next` moves to the following one.
/// Exhausted cursors report `is_valid() == false` and yield empty slices.
pub trait StorageIterator {
    /// Key under the cursor.
    fn key(&self) -> &[u8];

    /// Value under the cursor (empty for tombstones).
    fn value(&self) -> &[u8];

    /// Transaction id of the version under the cursor.
    fn txn_id(&self) -> TxnId;

    /// Whether the cursor sits on an entry.
    fn is_valid(&self) -> bool;

    /// Move to the next entry.
    fn next(&mut self) -> Result<(), IterError>;
}

// ------------------------------------------------------------------------------------------------
// SearchItem + HeapIterator
// ------------------------------------------------------------------------------------------------

/// One candidate entry in a k-way merge, tagged with its source.
///
/// `idx` identifies the source: the convention is `-(sst_id)` for tables
/// and small non-negative values for memtables (0 = active, 1.. = frozen,
/// newest first), so a smaller tag always means a newer source. `level`
/// breaks ties between tables from different levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    /// User key.
    pub key: Vec<u8>,

    /// Value bytes; empty marks a tombstone.
    pub value: Vec<u8>,

    /// Transaction id of this version.
    pub txn_id: TxnId,

    /// Source tag; smaller = newer source.
    pub idx: i64,

    /// Level tag; smaller = closer to the memtable.
    pub level: usize,
}

impl Ord for SearchItem {
    /// Merge priority: key ascending, txn id descending, level ascending,
    /// then source tag ascending.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.txn_id.cmp(&self.txn_id))
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for SearchItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap merge over collected [`SearchItem`]s.
///
/// Yields each logical key once: the newest version visible at
/// `max_txn_id` wins, and every other version of that key is drained as
/// superseded. Tombstones are **not** filtered here — wrap the final
/// merge in a [`TombstoneFilter`] for user-facing scans.
pub struct HeapIterator {
    heap: BinaryHeap<Reverse<SearchItem>>,
    current: Option<SearchItem>,
    max_txn_id: TxnId,
}

impl HeapIterator {
    /// Builds the heap and positions on the first visible entry.
    pub fn new(items: Vec<SearchItem>, max_txn_id: TxnId) -> Self {
        let heap = items.into_iter().map(Reverse).collect();
        let mut iter = Self {
            heap,
            current: None,
            max_txn_id,
        };
        iter.current = iter.pull_next();
        iter
    }

    fn pull_next(&mut self) -> Option<SearchItem> {
        // Skip tops too new for this snapshot; an older visible version
        // of the same key (if any) surfaces right behind them.
        while let Some(Reverse(top)) = self.heap.peek() {
            if is_visible(top.txn_id, self.max_txn_id) {
                break;
            }
            self.heap.pop();
        }

        let Reverse(winner) = self.heap.pop()?;

        // Drain superseded versions of the winning key.
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.key == winner.key {
                self.heap.pop();
            } else {
                break;
            }
        }

        Some(winner)
    }
}

impl StorageIterator for HeapIterator {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |item| &item.key)
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[], |item| &item.value)
    }

    fn txn_id(&self) -> TxnId {
        self.current.as_ref().map_or(0, |item| item.txn_id)
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<(), IterError> {
        self.current = self.pull_next();
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TwoMergeIterator
// ------------------------------------------------------------------------------------------------

/// Binary merge of two cursors; on equal keys the **left** child wins and
/// the right child is advanced past the duplicate.
pub struct TwoMergeIterator<A: StorageIterator, B: StorageIterator> {
    a: A,
    b: B,
    choose_a: bool,
}

impl<A: StorageIterator, B: StorageIterator> TwoMergeIterator<A, B> {
    /// Builds the merge, resolving an initial key collision.
    pub fn new(a: A, b: B) -> Result<Self, IterError> {
        let mut iter = Self {
            a,
            b,
            choose_a: false,
        };
        iter.skip_b()?;
        iter.choose_a = iter.pick_a();
        Ok(iter)
    }

    fn pick_a(&self) -> bool {
        if !self.a.is_valid() {
            return false;
        }
        if !self.b.is_valid() {
            return true;
        }
        self.a.key() < self.b.key()
    }

    /// Each child yields a key at most once, so a single advance of the
    /// right child resolves a collision.
    fn skip_b(&mut self) -> Result<(), IterError> {
        if self.a.is_valid() && self.b.is_valid() && self.a.key() == self.b.key() {
            self.b.next()?;
        }
        Ok(())
    }
}

impl<A: StorageIterator, B: StorageIterator> StorageIterator for TwoMergeIterator<A, B> {
    fn key(&self) -> &[u8] {
        if self.choose_a {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.choose_a {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn txn_id(&self) -> TxnId {
        if self.choose_a {
            self.a.txn_id()
        } else {
            self.b.txn_id()
        }
    }

    fn is_valid(&self) -> bool {
        self.a.is_valid() || self.b.is_valid()
    }

    fn next(&mut self) -> Result<(), IterError> {
        if self.choose_a {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b()?;
        self.choose_a = self.pick_a();
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// ConcatIterator
// ------------------------------------------------------------------------------------------------

/// Sequential cursor over a sorted run of **key-disjoint** SSTs (levels
/// 1 and deeper). No heap is needed: the tables do not overlap, so they
/// are simply walked in order.
pub struct ConcatIterator {
    ssts: Vec<Arc<SsTable>>,
    cur: Option<SstIterator>,
    next_sst: usize,
    max_txn_id: TxnId,
}

impl ConcatIterator {
    /// Builds a cursor over `ssts`, which must be sorted by `first_key`
    /// and pairwise disjoint.
    pub fn new(ssts: Vec<Arc<SsTable>>, max_txn_id: TxnId) -> Result<Self, IterError> {
        let mut iter = Self {
            ssts,
            cur: None,
            next_sst: 0,
            max_txn_id,
        };
        iter.roll_forward()?;
        Ok(iter)
    }

    fn roll_forward(&mut self) -> Result<(), IterError> {
        loop {
            if matches!(&self.cur, Some(cur) if cur.is_valid()) {
                return Ok(());
            }
            if self.next_sst >= self.ssts.len() {
                self.cur = None;
                return Ok(());
            }
            let sst = Arc::clone(&self.ssts[self.next_sst]);
            self.next_sst += 1;
            self.cur = Some(SstIterator::new(sst, self.max_txn_id)?);
        }
    }
}

impl StorageIterator for ConcatIterator {
    fn key(&self) -> &[u8] {
        self.cur.as_ref().map_or(&[], |cur| cur.key())
    }

    fn value(&self) -> &[u8] {
        self.cur.as_ref().map_or(&[], |cur| cur.value())
    }

    fn txn_id(&self) -> TxnId {
        self.cur.as_ref().map_or(0, |cur| cur.txn_id())
    }

    fn is_valid(&self) -> bool {
        self.cur.as_ref().is_some_and(|cur| cur.is_valid())
    }

    fn next(&mut self) -> Result<(), IterError> {
        if let Some(cur) = &mut self.cur {
            cur.next()?;
        }
        self.roll_forward()
    }
}

// ------------------------------------------------------------------------------------------------
// TombstoneFilter
// ------------------------------------------------------------------------------------------------

/// Hides deleted keys from a merged stream.
///
/// The wrapped cursor must already yield one (newest-visible) entry per
/// key; this filter then drops the entries whose value is empty. It is
/// the outermost layer of every user-facing scan — and deliberately NOT
/// part of compaction, which must carry tombstones forward.
pub struct TombstoneFilter<I: StorageIterator> {
    inner: I,
}

impl<I: StorageIterator> TombstoneFilter<I> {
    /// Wraps `inner`, skipping any leading tombstones.
    pub fn new(inner: I) -> Result<Self, IterError> {
        let mut filter = Self { inner };
        filter.skip_tombstones()?;
        Ok(filter)
    }

    fn skip_tombstones(&mut self) -> Result<(), IterError> {
        while self.inner.is_valid() && self.inner.value().is_empty() {
            self.inner.next()?;
        }
        Ok(())
    }
}

impl<I: StorageIterator> StorageIterator for TombstoneFilter<I> {
    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn txn_id(&self) -> TxnId {
        self.inner.txn_id()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<(), IterError> {
        self.inner.next()?;
        self.skip_tombstones()
    }
}
