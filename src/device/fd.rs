// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! File-descriptor back-end: the library path.
//!
//! Wraps an open block-device node (or a regular file standing in for one)
//! and reports geometry from the file length. Volume-manager queries are
//! unsupported here; the superblock synthesizes slice geometry instead.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::device::{BlockInfo, SliceExtent, SliceRange, VolumeInfo};
use crate::error::{BlocksealError, Result};

/// A block device reached through a file.
pub struct FdBackend {
    file: File,
    info: BlockInfo,
}

impl FdBackend {
    /// Wraps an already-open file, deriving the block count from its length.
    pub fn new(file: File, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(BlocksealError::InvalidArgs("block size must be nonzero"));
        }
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            info: BlockInfo {
                block_size,
                block_count: len / u64::from(block_size),
            },
        })
    }

    /// Opens `path` read-write and wraps it.
    pub fn open(path: &Path, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::new(file, block_size)
    }

    pub(crate) fn block_info(&mut self) -> Result<BlockInfo> {
        Ok(self.info)
    }

    pub(crate) fn volume_query(&mut self) -> Result<VolumeInfo> {
        Err(BlocksealError::Unsupported(
            "no volume manager behind this file".to_string(),
        ))
    }

    pub(crate) fn vslice_query(&mut self, _starts: &[u64]) -> Result<Vec<SliceRange>> {
        Err(BlocksealError::Unsupported(
            "no volume manager behind this file".to_string(),
        ))
    }

    pub(crate) fn extend(&mut self, _extent: SliceExtent) -> Result<()> {
        Err(BlocksealError::Unsupported(
            "no volume manager behind this file".to_string(),
        ))
    }

    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub(crate) fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}
