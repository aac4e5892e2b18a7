//! File primitives backing SSTs and the transaction state file.
//!
//! Two concerns live here:
//!
//! - [`FileObject`] — an immutable, memory-mapped, random-read file. SSTs
//!   are written exactly once (via [`FileObject::create_and_write`], which
//!   goes through a `.tmp` → rename so a crash cannot expose a torn file)
//!   and then only ever read.
//! - [`read_state_file`] / [`write_state_file`] — a tiny fixed-size file of
//!   `u64` words, rewritten whole and fsynced on every update. Used for the
//!   transaction watermarks.
//!
//! # Safety
//!
//! `Mmap::map` is `unsafe` because the mapping's contents could change under
//! us if the file were mutated concurrently. Files opened here are either
//! created-once-then-immutable (SSTs) or rewritten atomically via rename, so
//! the mapping is stable for the life of the handle.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;

/// Errors returned by file primitives.
#[derive(Debug, Error)]
pub enum FileIoError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the end of the file.
    #[error("read of {len} bytes at offset {offset} past end of file (size {size})")]
    OutOfRange {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Actual file size.
        size: usize,
    },

    /// The file is smaller than its fixed-size format requires.
    #[error("state file truncated: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes the format requires.
        expected: usize,
        /// Bytes actually present.
        found: usize,
    },
}

/// An immutable, memory-mapped, random-read file.
///
/// The underlying descriptor is closed once the mapping is established;
/// the mapping itself keeps the data reachable.
#[derive(Debug)]
pub struct FileObject {
    path: PathBuf,
    mmap: Mmap,
}

impl FileObject {
    /// Write `bytes` as a brand-new file at `path` and open it for reading.
    ///
    /// The data is first written to `<path>.tmp` and fsynced, then renamed
    /// into place, then the containing directory is fsynced.
    pub fn create_and_write(path: impl AsRef<Path>, bytes: &[u8]) -> Result<Self, FileIoError> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");

        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, path)?;
        if let Some(dir) = path.parent() {
            if let Ok(dir_file) = File::open(dir) {
                dir_file.sync_all()?;
            }
        }

        Self::open(path)
    }

    /// Open an existing file read-only and map it into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileIoError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // Mapping is stable: see the module-level safety note.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// Total file size in bytes.
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Path this object was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], FileIoError> {
        let end = offset.checked_add(len).ok_or(FileIoError::OutOfRange {
            offset,
            len,
            size: self.mmap.len(),
        })?;
        if end > self.mmap.len() {
            return Err(FileIoError::OutOfRange {
                offset,
                len,
                size: self.mmap.len(),
            });
        }
        Ok(&self.mmap[offset..end])
    }

    /// Read a little-endian `u32` at `offset`.
    pub fn read_u32(&self, offset: usize) -> Result<u32, FileIoError> {
        let bytes = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: usize) -> Result<u64, FileIoError> {
        let bytes = self.read(offset, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    /// Delete the backing file. Consumes the object; the mapping is dropped
    /// before the unlink so no handle outlives the file.
    pub fn delete(self) -> Result<(), FileIoError> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// Read a fixed-size state file of `count` little-endian `u64` words.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_state_file(path: impl AsRef<Path>, count: usize) -> Result<Option<Vec<u64>>, FileIoError> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let expected = count * 8;
    if bytes.len() < expected {
        return Err(FileIoError::Truncated {
            expected,
            found: bytes.len(),
        });
    }

    let mut words = Vec::with_capacity(count);
    for i in 0..count {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        words.push(u64::from_le_bytes(arr));
    }
    Ok(Some(words))
}

/// Rewrite a fixed-size state file whole: tmp write, fsync, rename.
pub fn write_state_file(path: impl AsRef<Path>, words: &[u64]) -> Result<(), FileIoError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    let mut bytes = Vec::with_capacity(words.len() * 8);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }

    let mut tmp = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp.write_all(&bytes)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    Ok(())
}
