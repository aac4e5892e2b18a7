//! # SSTable Module
//!
//! Immutable, sorted, on-disk tables. Each SST holds a run of data blocks,
//! a block index (meta section), and an optional bloom filter, with two
//! trailing offsets as the recovery anchors.
//!
//! # On-disk layout
//!
//! ```text
//! [BLOCK][u32 crc32]        × N
//! [meta section]            (see `meta`)
//! [bloom section]           (see `bloom`; may be absent)
//! [u32 meta_offset][u32 bloom_offset]
//! ```
//!
//! The bloom section is absent exactly when `bloom_offset + 8` equals the
//! file size. All integers are little-endian.
//!
//! # File naming
//!
//! `sst_<32-digit-zero-padded-id>.<level>` inside the engine directory —
//! the id orders tables by creation and the extension pins the level, so
//! a cold start can rebuild the level map from a directory listing alone.
//!
//! # Concurrency model
//!
//! SSTs are immutable: reads are lock-free and any number of readers may
//! share one [`SsTable`] handle. Decoded blocks are shared through the
//! LRU-K [`BlockCache`].

pub mod bloom;
pub mod builder;
pub mod iterator;
pub mod meta;

#[cfg(test)]
mod tests;

pub use bloom::{BloomError, BloomFilter};
pub use builder::SsTableBuilder;
pub use iterator::SstIterator;
pub use meta::{BlockMeta, MetaError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::block::{Block, BlockError};
use crate::cache::BlockCache;
use crate::encoding::EncodingError;
use crate::engine::utils::{Entry, TxnId};
use crate::fileio::{FileIoError, FileObject};

const FOOTER_SIZE: usize = 8;

/// Errors returned by SST build, open, and read paths.
#[derive(Debug, Error)]
pub enum SsTableError {
    /// Underlying file I/O failure.
    #[error("file error: {0}")]
    File(#[from] FileIoError),

    /// Data block corruption.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// Block index corruption.
    #[error("meta error: {0}")]
    Meta(#[from] MetaError),

    /// Bloom section corruption.
    #[error("bloom error: {0}")]
    Bloom(#[from] BloomError),

    /// Wire-format error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Builder received a key below the previous one.
    #[error("out-of-order key: {key:?} after {prev:?}")]
    OutOfOrderKey {
        /// The offending key.
        key: Vec<u8>,
        /// The previously added key.
        prev: Vec<u8>,
    },

    /// Attempted to build an SST with no entries.
    #[error("cannot build an empty SST")]
    EmptyBuild,

    /// Footer or section framing that cannot be valid.
    #[error("malformed SST: {0}")]
    Malformed(String),
}

/// Builds the on-disk path of an SST.
pub fn sst_path(dir: &Path, sst_id: u64, level: usize) -> PathBuf {
    dir.join(format!("sst_{sst_id:032}.{level}"))
}

/// Parses `sst_<32-digit-id>.<level>` back into `(sst_id, level)`.
pub fn parse_sst_filename(name: &str) -> Option<(u64, usize)> {
    let rest = name.strip_prefix("sst_")?;
    let (id_part, level_part) = rest.split_once('.')?;
    if id_part.len() != 32 || !id_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sst_id = id_part.parse::<u64>().ok()?;
    let level = level_part.parse::<usize>().ok()?;
    Some((sst_id, level))
}

/// An open, immutable on-disk table.
pub struct SsTable {
    sst_id: u64,
    level: usize,
    file: FileObject,
    metas: Vec<BlockMeta>,
    meta_offset: u32,
    bloom_offset: u32,
    bloom: Option<BloomFilter>,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    min_txn_id: TxnId,
    max_txn_id: TxnId,
    cache: Arc<BlockCache>,
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("sst_id", &self.sst_id)
            .field("level", &self.level)
            .field("blocks", &self.metas.len())
            .field("txn_range", &(self.min_txn_id, self.max_txn_id))
            .finish_non_exhaustive()
    }
}

impl SsTable {
    /// Opens an existing SST file.
    ///
    /// Reads the two trailing offsets, decodes and verifies the meta
    /// section and (if present) the bloom section, and derives the
    /// table's key and txn-id bounds. The txn range requires one pass
    /// over the data blocks; that pass bypasses the cache.
    pub fn open(
        sst_id: u64,
        level: usize,
        path: impl AsRef<Path>,
        cache: Arc<BlockCache>,
    ) -> Result<Self, SsTableError> {
        let file = FileObject::open(path.as_ref())?;
        let size = file.size();
        if size < FOOTER_SIZE {
            return Err(SsTableError::Malformed(format!(
                "file of {size} bytes cannot hold the footer"
            )));
        }

        let meta_offset = file.read_u32(size - FOOTER_SIZE)?;
        let bloom_offset = file.read_u32(size - FOOTER_SIZE + 4)?;
        if (meta_offset as usize) > size - FOOTER_SIZE
            || (bloom_offset as usize) > size - FOOTER_SIZE
            || meta_offset > bloom_offset
        {
            return Err(SsTableError::Malformed(format!(
                "footer offsets {meta_offset}/{bloom_offset} out of range for {size} bytes"
            )));
        }

        let meta_bytes = file.read(meta_offset as usize, (bloom_offset - meta_offset) as usize)?;
        let metas = BlockMeta::decode_section(meta_bytes)?;
        if metas.is_empty() {
            return Err(SsTableError::Malformed("SST with no blocks".to_string()));
        }

        let bloom = if bloom_offset as usize + FOOTER_SIZE == size {
            None
        } else {
            let bloom_bytes =
                file.read(bloom_offset as usize, size - FOOTER_SIZE - bloom_offset as usize)?;
            Some(BloomFilter::decode(bloom_bytes)?)
        };

        let first_key = metas[0].first_key.clone();
        let last_key = metas[metas.len() - 1].last_key.clone();

        let mut table = Self {
            sst_id,
            level,
            file,
            metas,
            meta_offset,
            bloom_offset,
            bloom,
            first_key,
            last_key,
            min_txn_id: TxnId::MAX,
            max_txn_id: 0,
            cache,
        };

        // Derive the txn-id range; the layout carries no dedicated field.
        for idx in 0..table.metas.len() {
            let block = table.read_block_uncached(idx)?;
            for i in 0..block.num_entries() {
                let id = block.txn_at(i);
                table.min_txn_id = table.min_txn_id.min(id);
                table.max_txn_id = table.max_txn_id.max(id);
            }
        }
        if table.min_txn_id == TxnId::MAX {
            table.min_txn_id = 0;
        }

        debug!(
            sst_id,
            level,
            blocks = table.metas.len(),
            "SST opened"
        );
        Ok(table)
    }

    /// Table id.
    pub fn sst_id(&self) -> u64 {
        self.sst_id
    }

    /// Level this table belongs to.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Smallest key in the table.
    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    /// Largest key in the table.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// `(min, max)` transaction ids stored in the table.
    pub fn txn_range(&self) -> (TxnId, TxnId) {
        (self.min_txn_id, self.max_txn_id)
    }

    /// Byte offsets of the meta and bloom sections — the footer anchors.
    pub fn section_offsets(&self) -> (u32, u32) {
        (self.meta_offset, self.bloom_offset)
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.metas.len()
    }

    /// Block index records.
    pub(crate) fn metas(&self) -> &[BlockMeta] {
        &self.metas
    }

    /// Whether `key` could be in this table's key range.
    pub fn key_within_range(&self, key: &[u8]) -> bool {
        self.first_key.as_slice() <= key && key <= self.last_key.as_slice()
    }

    /// End of the data region for block `idx`.
    fn block_end(&self, idx: usize) -> u32 {
        if idx + 1 < self.metas.len() {
            self.metas[idx + 1].offset
        } else {
            self.meta_offset
        }
    }

    fn read_block_uncached(&self, idx: usize) -> Result<Arc<Block>, SsTableError> {
        let start = self.metas[idx].offset;
        let end = self.block_end(idx);
        if end < start {
            return Err(SsTableError::Malformed(format!(
                "block {idx} spans {start}..{end}"
            )));
        }
        let bytes = self.file.read(start as usize, (end - start) as usize)?;
        Ok(Arc::new(Block::decode(bytes, true)?))
    }

    /// Reads block `idx`, serving from the shared cache when possible.
    pub fn read_block(&self, idx: usize) -> Result<Arc<Block>, SsTableError> {
        if let Some(block) = self.cache.get(self.sst_id, idx) {
            return Ok(block);
        }
        let block = self.read_block_uncached(idx)?;
        self.cache.put(self.sst_id, idx, Arc::clone(&block));
        trace!(sst_id = self.sst_id, block_idx = idx, "block cache fill");
        Ok(block)
    }

    /// Index of the block that could hold `key`, or `None` when the bloom
    /// filter or the index rules the key out (no block is read either way).
    pub fn find_block_idx(&self, key: &[u8]) -> Option<usize> {
        if let Some(bloom) = &self.bloom {
            if !bloom.may_contain(key) {
                return None;
            }
        }
        let idx = self
            .metas
            .partition_point(|meta| meta.last_key.as_slice() < key);
        if idx < self.metas.len() && self.metas[idx].first_key.as_slice() <= key {
            Some(idx)
        } else {
            None
        }
    }

    /// Point lookup: the newest version of `key` visible at `txn_id`.
    ///
    /// A returned tombstone entry is a conclusive "deleted" answer — the
    /// caller must not consult older tables for this key.
    pub fn get(&self, key: &[u8], txn_id: TxnId) -> Result<Option<Entry>, SsTableError> {
        let Some(mut idx) = self.find_block_idx(key) else {
            return Ok(None);
        };

        // A long version run may spill across block boundaries; keep
        // walking while the next block still starts with this key.
        loop {
            let block = self.read_block(idx)?;
            if let Some(entry_idx) = block.get(key, txn_id) {
                return Ok(Some(block.entry_at(entry_idx)));
            }
            idx += 1;
            if idx >= self.metas.len() || self.metas[idx].first_key.as_slice() != key {
                return Ok(None);
            }
        }
    }

    /// Cursor over the whole table at the given snapshot.
    pub fn begin(self: &Arc<Self>, txn_id: TxnId) -> Result<SstIterator, SsTableError> {
        SstIterator::new(Arc::clone(self), txn_id)
    }

    /// Unlinks the backing file and drops this table's cached blocks.
    ///
    /// The caller must already have unpublished the table from the level
    /// map. A reader still holding the handle keeps the mapping alive
    /// until it drops — the unlink only removes the name.
    pub fn del_sst(&self) -> Result<(), SsTableError> {
        self.cache.evict_sst(self.sst_id);
        debug!(sst_id = self.sst_id, level = self.level, "deleting SST file");
        std::fs::remove_file(self.file.path()).map_err(FileIoError::Io)?;
        Ok(())
    }
}
