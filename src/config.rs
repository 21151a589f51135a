// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! On-disk format constants and algorithm selection.
//!
//! The superblock format is identified by a fixed type GUID and a 32-bit
//! version stored big-endian. Each version pins a full algorithm tuple
//! (wrap AEAD, data cipher, digest) and, through it, every derived length
//! in the slot table.

use crate::error::{BlocksealError, Result};

/// Length of both GUIDs in the superblock header.
pub const GUID_LEN: usize = 16;

/// Header is type GUID | instance GUID | version.
pub const HEADER_LEN: usize = GUID_LEN + GUID_LEN + 4;

/// Number of key slots in every superblock.
pub const NUM_SLOTS: u64 = 16;

/// Metadata blocks reserved at each end of the device.
pub const RESERVED_SLICES: u64 = 2;

/// Logical blocks are normalized to this size during the geometry probe.
pub const PAGE_SIZE: u32 = 4096;

/// Fixed type GUID identifying the superblock format. RFC 4122 variant 1,
/// version 4 bit pattern, shared by every device of this format.
pub const TYPE_GUID: [u8; GUID_LEN] = [
    0x6b, 0x2e, 0x95, 0xd1, 0x3c, 0x8a, 0x41, 0xf0, 0x9e, 0x44, 0x07, 0x5b, 0xc1, 0xa8, 0x26, 0x3d,
];

/// Algorithm tuple selector.
///
/// A version pins the wrap AEAD, the data cipher, and the KDF digest all at
/// once; mixing members of different tuples is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Version {
    /// AES-XTS-256 data cipher, AES-128-GCM-SIV wrap AEAD, SHA-256 digest.
    Aes256XtsSha256 = 1,
}

impl Version {
    /// Version written by `create` for new devices.
    pub const DEFAULT: Version = Version::Aes256XtsSha256;

    /// Parses the version field read from disk.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for any value not naming a known version. This
    /// is the first point an unknown version can be observed, and it is
    /// rejected here before any key derivation happens.
    pub fn from_wire(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Version::Aes256XtsSha256),
            _ => Err(BlocksealError::Unsupported(format!(
                "unknown superblock version {raw:#010x}"
            ))),
        }
    }

    /// The value stored big-endian in the header.
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Wrap AEAD key length (AES-128-GCM-SIV).
    pub fn wrap_key_len(self) -> usize {
        16
    }

    /// Wrap AEAD nonce length.
    pub fn wrap_iv_len(self) -> usize {
        12
    }

    /// Wrap AEAD authentication tag length.
    pub fn tag_len(self) -> usize {
        16
    }

    /// Data cipher key length (XTS uses two AES-256 keys).
    pub fn data_key_len(self) -> usize {
        64
    }

    /// Data cipher IV length (the XTS tweak base).
    pub fn data_iv_len(self) -> usize {
        16
    }

    /// KDF digest output length (SHA-256).
    pub fn digest_len(self) -> usize {
        32
    }

    /// Bytes one sealed slot occupies: data key, data IV, and the tag.
    pub fn slot_len(self) -> usize {
        self.data_key_len() + self.data_iv_len() + self.tag_len()
    }

    /// Smallest block able to hold the header and a full slot table.
    pub fn min_block_len(self) -> usize {
        HEADER_LEN + NUM_SLOTS as usize * self.slot_len()
    }
}
