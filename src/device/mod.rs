// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Block-device back-ends.
//!
//! The superblock speaks one contract to two very different devices: a
//! plain file descriptor on the library path and a queued driver handle on
//! the kernel path. [`Backend`] is the sum of the two, fixed at
//! construction, so a superblock can never hold both at once.

pub mod driver;
pub mod fd;

pub use driver::{DeviceService, DriverBackend};
pub use fd::FdBackend;

use crate::error::Result;

/// Device geometry as reported by the block layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockInfo {
    pub block_size: u32,
    pub block_count: u64,
}

/// Volume-manager geometry: the allocation unit and how many of them the
/// device spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    pub slice_size: u64,
    pub vslice_count: u64,
}

/// One entry of a virtual-slice allocation query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    /// Whether the run starting at the queried slice is allocated.
    pub allocated: bool,
    /// Length of the run sharing that state.
    pub count: u64,
}

/// A virtual-slice range for allocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceExtent {
    pub offset: u64,
    pub length: u64,
}

/// The back-end a superblock is bound to.
pub enum Backend {
    /// Library path: positional I/O over an open file.
    Fd(FdBackend),
    /// Kernel path: synchronous transactions over a device queue.
    Driver(DriverBackend),
}

impl Backend {
    /// Queries block geometry.
    pub fn block_info(&mut self) -> Result<BlockInfo> {
        match self {
            Backend::Fd(fd) => fd.block_info(),
            Backend::Driver(drv) => drv.block_info(),
        }
    }

    /// Queries volume-manager geometry. Plain devices return `Unsupported`.
    pub fn volume_query(&mut self) -> Result<VolumeInfo> {
        match self {
            Backend::Fd(fd) => fd.volume_query(),
            Backend::Driver(drv) => drv.volume_query(),
        }
    }

    /// Queries the allocation state of the virtual slices in `starts`.
    pub fn vslice_query(&mut self, starts: &[u64]) -> Result<Vec<SliceRange>> {
        match self {
            Backend::Fd(fd) => fd.vslice_query(starts),
            Backend::Driver(drv) => drv.vslice_query(starts),
        }
    }

    /// Allocates the given virtual-slice range.
    pub fn extend(&mut self, extent: SliceExtent) -> Result<()> {
        match self {
            Backend::Fd(fd) => fd.extend(extent),
            Backend::Driver(drv) => drv.extend(extent),
        }
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Backend::Fd(fd) => fd.read_at(offset, buf),
            Backend::Driver(drv) => drv.read_at(offset, buf),
        }
    }

    /// Writes all of `buf` at `offset`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        match self {
            Backend::Fd(fd) => fd.write_at(offset, buf),
            Backend::Driver(drv) => drv.write_at(offset, buf),
        }
    }

    /// True on the kernel path. Decides which half of the unlocked surface
    /// (enroll/revoke/shred vs. bind_ciphers) this instance may use.
    pub fn is_driver(&self) -> bool {
        matches!(self, Backend::Driver(_))
    }
}

impl From<FdBackend> for Backend {
    fn from(fd: FdBackend) -> Self {
        Backend::Fd(fd)
    }
}

impl From<DriverBackend> for Backend {
    fn from(drv: DriverBackend) -> Self {
        Backend::Driver(drv)
    }
}
