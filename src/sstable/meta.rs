//! The SST-level block index: one `(offset, first_key, last_key)` record
//! per data block, serialized as a counted array with a trailing CRC32.
//!
//! # Wire format
//!
//! ```text
//! [u32 num_entries]
//! [u32 offset][u16 len][first_key][u16 len][last_key]   × num_entries
//! [u32 crc32 over the entry bytes]
//! ```

use thiserror::Error;

use crate::encoding::{get_bytes16, put_bytes16, Decode, Encode, EncodingError};

/// Block-index decode failures.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The trailing CRC32 did not match the entry bytes.
    #[error("block meta hash mismatch")]
    HashMismatch,

    /// Structural corruption in the counted array.
    #[error("malformed block meta: {0}")]
    Malformed(String),

    /// Wire-format error while parsing an entry.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Index record for one data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Byte offset of the block (including its trailing hash) within the
    /// SST's data section.
    pub offset: u32,

    /// First key stored in the block.
    pub first_key: Vec<u8>,

    /// Last key stored in the block.
    pub last_key: Vec<u8>,
}

impl BlockMeta {
    /// Serializes a whole index section.
    pub fn encode_section(metas: &[BlockMeta]) -> Result<Vec<u8>, MetaError> {
        let mut entries = Vec::new();
        for meta in metas {
            meta.offset.encode_to(&mut entries)?;
            put_bytes16(&mut entries, &meta.first_key)?;
            put_bytes16(&mut entries, &meta.last_key)?;
        }

        let mut buf = Vec::with_capacity(4 + entries.len() + 4);
        (metas.len() as u32).encode_to(&mut buf)?;
        buf.extend_from_slice(&entries);
        buf.extend_from_slice(&crc32fast::hash(&entries).to_le_bytes());
        Ok(buf)
    }

    /// Reverses [`BlockMeta::encode_section`], verifying the hash.
    pub fn decode_section(bytes: &[u8]) -> Result<Vec<BlockMeta>, MetaError> {
        if bytes.len() < 8 {
            return Err(MetaError::Malformed(
                "meta section shorter than its framing".to_string(),
            ));
        }
        let (count, header) = u32::decode_from(bytes)?;

        let entries = &bytes[header..bytes.len() - 4];
        let stored = {
            let tail = &bytes[bytes.len() - 4..];
            u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]])
        };
        if crc32fast::hash(entries) != stored {
            return Err(MetaError::HashMismatch);
        }

        let mut metas = Vec::with_capacity(count as usize);
        let mut offset = 0usize;
        for i in 0..count {
            let (block_offset, n) = u32::decode_from(&entries[offset..])?;
            offset += n;
            let (first_key, n) = get_bytes16(&entries[offset..])?;
            offset += n;
            let (last_key, n) = get_bytes16(&entries[offset..])?;
            offset += n;

            if first_key > last_key {
                return Err(MetaError::Malformed(format!(
                    "meta entry {i} has first_key > last_key"
                )));
            }
            metas.push(BlockMeta {
                offset: block_offset,
                first_key,
                last_key,
            });
        }

        if offset != entries.len() {
            return Err(MetaError::Malformed(format!(
                "{} trailing bytes after {count} meta entries",
                entries.len() - offset
            )));
        }
        Ok(metas)
    }
}
