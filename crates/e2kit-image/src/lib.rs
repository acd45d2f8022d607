#![forbid(unsafe_code)]
//! Image file access.
//!
//! An `Image` owns the full 128 KiB of a single-group ext2 image as a
//! mutable byte buffer. `open` reads the backing file in one shot with
//! positioned I/O; mutating tools edit the buffer in place and call
//! `flush` to write it back. In-memory images (no backing file) back the
//! test suites and `mkfs`.

use e2kit_error::{E2Error, Result};
use e2kit_types::{BLOCK_SIZE, BlockNo, IMAGE_SIZE, block_offset};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::debug;

/// A single-group ext2 image held fully in memory.
#[derive(Debug)]
pub struct Image {
    file: Option<File>,
    bytes: Vec<u8>,
}

impl Image {
    /// Open an image file read+write and load its 128 KiB into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                E2Error::Io(std::io::Error::new(
                    err.kind(),
                    format!("cannot open {}: {err}", path.display()),
                ))
            })?;

        let len = file.metadata()?.len();
        if len < IMAGE_SIZE as u64 {
            return Err(E2Error::InvalidArgument(format!(
                "cannot map {}: {len} bytes, expected at least {IMAGE_SIZE}",
                path.display()
            )));
        }

        let mut bytes = vec![0_u8; IMAGE_SIZE];
        file.read_exact_at(&mut bytes, 0)?;
        debug!(path = %path.display(), "loaded image");
        Ok(Self {
            file: Some(file),
            bytes,
        })
    }

    /// Create (or truncate) an image file and start from a zeroed buffer.
    ///
    /// The file contents are not written until `flush`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| {
                E2Error::Io(std::io::Error::new(
                    err.kind(),
                    format!("cannot open {}: {err}", path.display()),
                ))
            })?;
        file.set_len(IMAGE_SIZE as u64)?;
        debug!(path = %path.display(), "created blank image");
        Ok(Self {
            file: Some(file),
            bytes: vec![0_u8; IMAGE_SIZE],
        })
    }

    /// Wrap an in-memory buffer. The buffer must be exactly one image long.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != IMAGE_SIZE {
            return Err(E2Error::InvalidArgument(format!(
                "image buffer is {} bytes, expected {IMAGE_SIZE}",
                bytes.len()
            )));
        }
        Ok(Self { file: None, bytes })
    }

    /// Write the buffer back to the backing file and sync it.
    ///
    /// A no-op for in-memory images.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = &self.file {
            file.write_all_at(&self.bytes, 0)?;
            file.sync_all()?;
            debug!("flushed image");
        }
        Ok(())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Borrow one block. Block numbers index from 0; block 0 is the boot
    /// area.
    pub fn block(&self, block: BlockNo) -> Result<&[u8]> {
        let start = block_offset(block);
        let end = start + BLOCK_SIZE;
        if end > self.bytes.len() {
            return Err(E2Error::Corrupt {
                block: block.0,
                detail: "block number out of image range".into(),
            });
        }
        Ok(&self.bytes[start..end])
    }

    /// Mutably borrow one block.
    pub fn block_mut(&mut self, block: BlockNo) -> Result<&mut [u8]> {
        let start = block_offset(block);
        let end = start + BLOCK_SIZE;
        if end > self.bytes.len() {
            return Err(E2Error::Corrupt {
                block: block.0,
                detail: "block number out of image range".into(),
            });
        }
        Ok(&mut self.bytes[start..end])
    }

    /// Take the underlying buffer, dropping any backing file handle.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}
