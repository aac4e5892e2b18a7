//! SST builder — turns a sorted entry stream into a complete table file.
//!
//! Entries must arrive key-ascending with ties id-descending (the order
//! every upstream iterator produces). Blocks are sealed as they fill;
//! `build` then stages `data | meta | bloom | footer` and writes the file
//! in one atomic create.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::block::Block;
use crate::cache::BlockCache;
use crate::config::StoreConfig;
use crate::engine::utils::{version_cmp, TxnId};
use crate::fileio::FileObject;

use super::{BlockMeta, BloomFilter, SsTable, SsTableError};

/// Streaming builder for one SST file.
pub struct SsTableBuilder {
    block_size: usize,
    block: Block,
    /// Sealed blocks, each followed by its CRC32.
    data: Vec<u8>,
    metas: Vec<BlockMeta>,
    bloom: Option<BloomFilter>,
    last_added: Option<(Vec<u8>, TxnId)>,
    min_txn_id: TxnId,
    max_txn_id: TxnId,
    num_entries: usize,
}

impl SsTableBuilder {
    /// Creates a builder using the store's block size and bloom sizing.
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_bloom(
            config.block_size,
            Some(BloomFilter::new(
                config.bloom_expected_entries,
                config.bloom_fpr,
            )),
        )
    }

    /// Creates a builder with an explicit block size and optional filter.
    pub fn with_bloom(block_size: usize, bloom: Option<BloomFilter>) -> Self {
        Self {
            block_size,
            block: Block::new(block_size),
            data: Vec::new(),
            metas: Vec::new(),
            bloom,
            last_added: None,
            min_txn_id: TxnId::MAX,
            max_txn_id: 0,
            num_entries: 0,
        }
    }

    /// Appends one entry; input must be version-sorted.
    pub fn add(&mut self, key: &[u8], value: &[u8], txn_id: TxnId) -> Result<(), SsTableError> {
        if let Some((prev_key, prev_txn)) = &self.last_added {
            if version_cmp(key, txn_id, prev_key, *prev_txn) == std::cmp::Ordering::Less {
                return Err(SsTableError::OutOfOrderKey {
                    key: key.to_vec(),
                    prev: prev_key.clone(),
                });
            }
        }

        if !self.block.add_entry(key, value, txn_id, false) {
            // Block full: seal it and land the entry in a fresh one,
            // forcing if the entry alone exceeds the block size.
            self.finish_block();
            self.block.add_entry(key, value, txn_id, true);
        }

        if let Some(bloom) = &mut self.bloom {
            bloom.add(key);
        }
        self.min_txn_id = self.min_txn_id.min(txn_id);
        self.max_txn_id = self.max_txn_id.max(txn_id);
        self.last_added = Some((key.to_vec(), txn_id));
        self.num_entries += 1;
        Ok(())
    }

    /// Bytes staged in sealed blocks so far — compaction uses this to
    /// decide where to cut an output SST.
    pub fn estimated_size(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Seals the open block: appends its encoding plus hash to the staged
    /// data and records its index entry.
    fn finish_block(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let sealed = std::mem::replace(&mut self.block, Block::new(self.block_size));
        let encoded = sealed.encode();
        self.metas.push(BlockMeta {
            offset: self.data.len() as u32,
            first_key: sealed.first_key().to_vec(),
            last_key: sealed.last_key().to_vec(),
        });
        self.data.extend_from_slice(&encoded);
        self.data
            .extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
    }

    /// Writes the finished table to `path` and returns the open handle.
    pub fn build(
        mut self,
        sst_id: u64,
        level: usize,
        path: impl AsRef<Path>,
        cache: Arc<BlockCache>,
    ) -> Result<SsTable, SsTableError> {
        self.finish_block();
        if self.num_entries == 0 {
            return Err(SsTableError::EmptyBuild);
        }

        let mut buf = self.data;
        let meta_offset = buf.len() as u32;
        buf.extend_from_slice(&BlockMeta::encode_section(&self.metas)?);

        let bloom_offset = buf.len() as u32;
        if let Some(bloom) = &self.bloom {
            buf.extend_from_slice(&bloom.encode());
        }

        buf.extend_from_slice(&meta_offset.to_le_bytes());
        buf.extend_from_slice(&bloom_offset.to_le_bytes());

        let file = FileObject::create_and_write(path.as_ref(), &buf)?;

        let first_key = self.metas[0].first_key.clone();
        let last_key = self.metas[self.metas.len() - 1].last_key.clone();
        debug!(
            sst_id,
            level,
            blocks = self.metas.len(),
            entries = self.num_entries,
            bytes = file.size(),
            "SST built"
        );

        Ok(SsTable {
            sst_id,
            level,
            file,
            metas: self.metas,
            meta_offset,
            bloom_offset,
            bloom: self.bloom,
            first_key,
            last_key,
            min_txn_id: if self.min_txn_id == TxnId::MAX {
                0
            } else {
                self.min_txn_id
            },
            max_txn_id: self.max_txn_id,
            cache,
        })
    }
}
