//! Cursor over one SST — composes a block index position with a
//! [`BlockIterator`] and rolls forward across blocks as each one drains.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::block::BlockIterator;
use crate::engine::utils::TxnId;
use crate::iterators::{IterError, StorageIterator};

use super::{SsTable, SsTableError};

/// Shared monotone predicate used by range-scan cursors.
pub type KeyPredicate = Arc<dyn Fn(&[u8]) -> Ordering + Send + Sync>;

/// Forward cursor over an SST at a fixed snapshot.
pub struct SstIterator {
    sst: Arc<SsTable>,
    block_idx: usize,
    end_block: usize,
    inner: Option<BlockIterator>,
    max_txn_id: TxnId,
    /// When set, each visited block is trimmed to the predicate's
    /// matching index range.
    pred: Option<KeyPredicate>,
}

impl SstIterator {
    /// Cursor at the first visible entry of the table.
    pub fn new(sst: Arc<SsTable>, max_txn_id: TxnId) -> Result<Self, SsTableError> {
        let end_block = sst.num_blocks();
        let mut iter = Self {
            sst,
            block_idx: 0,
            end_block,
            inner: None,
            max_txn_id,
            pred: None,
        };
        iter.load_current_block(None)?;
        iter.roll_forward()?;
        Ok(iter)
    }

    /// Cursor at the first visible entry whose key is ≥ `key`.
    pub fn new_seek(
        sst: Arc<SsTable>,
        key: &[u8],
        max_txn_id: TxnId,
    ) -> Result<Self, SsTableError> {
        let end_block = sst.num_blocks();
        let start = sst
            .metas()
            .partition_point(|meta| meta.last_key.as_slice() < key);
        let mut iter = Self {
            sst,
            block_idx: start,
            end_block,
            inner: None,
            max_txn_id,
            pred: None,
        };
        iter.load_current_block(Some(key))?;
        iter.roll_forward()?;
        Ok(iter)
    }

    /// Cursor over the contiguous run of keys matching a monotone
    /// predicate, or `None` when no block can contain a match.
    pub fn new_predicate(
        sst: Arc<SsTable>,
        pred: KeyPredicate,
        max_txn_id: TxnId,
    ) -> Result<Option<Self>, SsTableError> {
        // A block may hold matches unless it lies entirely below or
        // entirely above the predicate's range.
        let metas = sst.metas();
        let start = metas.partition_point(|meta| pred(&meta.last_key) == Ordering::Less);
        let mut end = start;
        while end < metas.len() && pred(&metas[end].first_key) != Ordering::Greater {
            end += 1;
        }
        if start >= end {
            return Ok(None);
        }

        let mut iter = Self {
            sst,
            block_idx: start,
            end_block: end,
            inner: None,
            max_txn_id,
            pred: Some(pred),
        };
        iter.load_current_block(None)?;
        iter.roll_forward()?;
        if iter.is_valid() {
            Ok(Some(iter))
        } else {
            Ok(None)
        }
    }

    /// The table this cursor reads.
    pub fn sst(&self) -> &Arc<SsTable> {
        &self.sst
    }

    /// Decodes the block under `block_idx` into `inner`, honoring the
    /// cursor mode: plain, seek (first block only), or predicate-trimmed.
    fn load_current_block(&mut self, seek_key: Option<&[u8]>) -> Result<(), SsTableError> {
        if self.block_idx >= self.end_block {
            self.inner = None;
            return Ok(());
        }
        let block = self.sst.read_block(self.block_idx)?;

        let inner = match (&self.pred, seek_key) {
            (Some(pred), _) => match block.monotone_predicate(|key| pred(key))? {
                Some((lo, hi)) => BlockIterator::with_range(block, lo, hi, self.max_txn_id),
                // Block straddles the range without holding a match.
                None => BlockIterator::with_range(block, 0, 0, self.max_txn_id),
            },
            (None, Some(key)) => BlockIterator::new_seek(block, key, self.max_txn_id),
            (None, None) => BlockIterator::new(block, self.max_txn_id),
        };
        self.inner = Some(inner);
        Ok(())
    }

    /// Advances over drained or empty blocks until the cursor is valid or
    /// the block range is exhausted.
    fn roll_forward(&mut self) -> Result<(), SsTableError> {
        loop {
            match &self.inner {
                None => return Ok(()),
                Some(inner) if inner.is_valid() => return Ok(()),
                Some(_) => {
                    self.block_idx += 1;
                    if self.block_idx >= self.end_block {
                        self.inner = None;
                        return Ok(());
                    }
                    self.load_current_block(None)?;
                }
            }
        }
    }
}

impl StorageIterator for SstIterator {
    fn key(&self) -> &[u8] {
        self.inner.as_ref().map_or(&[], |inner| inner.key())
    }

    fn value(&self) -> &[u8] {
        self.inner.as_ref().map_or(&[], |inner| inner.value())
    }

    fn txn_id(&self) -> TxnId {
        self.inner.as_ref().map_or(0, |inner| inner.txn_id())
    }

    fn is_valid(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.is_valid())
    }

    fn next(&mut self) -> Result<(), IterError> {
        if let Some(inner) = &mut self.inner {
            inner.next()?;
        }
        self.roll_forward()?;
        Ok(())
    }
}
