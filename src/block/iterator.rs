//! Cursor over one block, yielding the newest visible version per key.

use std::sync::Arc;

use crate::engine::utils::{is_visible, TxnId};
use crate::iterators::{IterError, StorageIterator};

use super::Block;

/// Forward cursor over a (shared) block.
///
/// The cursor presents each logical key at most once: construction and
/// every [`BlockIterator::next`] land on the newest version visible at
/// `max_txn_id`, and advancing skips the remaining (older) versions of the
/// key just yielded. With `max_txn_id == 0` no visibility filtering is
/// applied and the newest version of each key wins.
#[derive(Debug, Clone)]
pub struct BlockIterator {
    block: Arc<Block>,
    idx: usize,
    end: usize,
    max_txn_id: TxnId,
}

impl BlockIterator {
    /// Cursor over the whole block.
    pub fn new(block: Arc<Block>, max_txn_id: TxnId) -> Self {
        let end = block.num_entries();
        let mut iter = Self {
            block,
            idx: 0,
            end,
            max_txn_id,
        };
        iter.skip_invisible();
        iter
    }

    /// Cursor positioned at the first visible entry whose key is ≥ `key`.
    pub fn new_seek(block: Arc<Block>, key: &[u8], max_txn_id: TxnId) -> Self {
        let end = block.num_entries();
        // Version-order lower bound with txn id 0 targets the newest
        // version of the first key at or after `key`.
        let idx = block.lower_bound(key, 0);
        let mut iter = Self {
            block,
            idx,
            end,
            max_txn_id,
        };
        iter.skip_invisible();
        iter
    }

    /// Cursor over the index range `[start, end)` — used for
    /// monotone-predicate scans, where the range is a whole number of
    /// key runs.
    pub fn with_range(block: Arc<Block>, start: usize, end: usize, max_txn_id: TxnId) -> Self {
        let end = end.min(block.num_entries());
        let mut iter = Self {
            block,
            idx: start,
            end,
            max_txn_id,
        };
        iter.skip_invisible();
        iter
    }

    fn skip_invisible(&mut self) {
        while self.idx < self.end && !is_visible(self.block.txn_at(self.idx), self.max_txn_id) {
            self.idx += 1;
        }
    }
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        if self.is_valid() {
            self.block.key_at(self.idx)
        } else {
            &[]
        }
    }

    fn value(&self) -> &[u8] {
        if self.is_valid() {
            self.block.value_at(self.idx)
        } else {
            &[]
        }
    }

    fn txn_id(&self) -> TxnId {
        if self.is_valid() {
            self.block.txn_at(self.idx)
        } else {
            0
        }
    }

    fn is_valid(&self) -> bool {
        self.idx < self.end
    }

    fn next(&mut self) -> Result<(), IterError> {
        if !self.is_valid() {
            return Ok(());
        }
        let cur_key = self.block.key_at(self.idx).to_vec();
        self.idx += 1;
        // Remaining entries with the same key are older versions of the
        // one just yielded.
        while self.idx < self.end && self.block.key_at(self.idx) == cur_key {
            self.idx += 1;
        }
        self.skip_invisible();
        Ok(())
    }
}
