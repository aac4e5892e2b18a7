//! Deterministic, zero-dependency binary encoding for on-disk persistence.
//!
//! This module provides the [`Encode`] and [`Decode`] traits plus the small
//! set of wire primitives every on-disk structure in the crate is built
//! from. Because the crate owns this format, the on-disk representation
//! **never** changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! | Type                | Encoding                               |
//! |---------------------|----------------------------------------|
//! | `u8`                | 1 byte                                 |
//! | `u16`               | 2 bytes, little-endian                 |
//! | `u32`               | 4 bytes, little-endian                 |
//! | `u64`               | 8 bytes, little-endian                 |
//! | short byte string   | `[u16 len][bytes]` (keys, values)      |
//!
//! All multi-byte integers are **little-endian**. Keys and values are
//! length-prefixed with `u16`, bounding a single key or inline value at
//! 64 KiB − 1 — larger values are rejected at the write path.
//!
//! # Zero-panic guarantee
//!
//! No function here uses `unwrap()`, `expect()`, or indexing that can
//! panic on attacker-controlled input. All errors are propagated via
//! [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A discriminant byte was not recognised.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// The tag value that was read.
        tag: u32,
        /// The Rust type being decoded.
        type_name: &'static str,
    },

    /// A length field exceeded what the wire format can carry.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations **must** produce deterministic output: the same logical
/// value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` on success so that callers can advance
/// a cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

impl Encode for u16 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u16 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 2)?;
        Ok((u16::from_le_bytes([buf[0], buf[1]]), 2))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 4)?;
        Ok((u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..8]);
        Ok((u64::from_le_bytes(bytes), 8))
    }
}

// ------------------------------------------------------------------------------------------------
// Short byte strings: [u16 len][bytes]
// ------------------------------------------------------------------------------------------------

/// Append a `u16`-length-prefixed byte string to `buf`.
///
/// Returns [`EncodingError::LengthOverflow`] when `bytes` exceeds
/// `u16::MAX` — keys and inline values must stay below 64 KiB.
pub fn put_bytes16(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), EncodingError> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        EncodingError::LengthOverflow(format!("byte string of {} exceeds u16::MAX", bytes.len()))
    })?;
    len.encode_to(buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Decode a `u16`-length-prefixed byte string from the front of `buf`.
///
/// Returns `(bytes, consumed)`.
pub fn get_bytes16(buf: &[u8]) -> Result<(Vec<u8>, usize), EncodingError> {
    let (len, mut offset) = u16::decode_from(buf)?;
    let len = len as usize;
    require(&buf[offset..], len)?;
    let data = buf[offset..offset + len].to_vec();
    offset += len;
    Ok((data, offset))
}

/// Borrowing variant of [`get_bytes16`] — returns a sub-slice of `buf`
/// instead of copying, for hot read paths.
pub fn get_bytes16_ref(buf: &[u8]) -> Result<(&[u8], usize), EncodingError> {
    let (len, offset) = u16::decode_from(buf)?;
    let len = len as usize;
    require(&buf[offset..], len)?;
    Ok((&buf[offset..offset + len], offset + len))
}
