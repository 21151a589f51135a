// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Blockseal - encrypted block-device superblock management
//!
//! This library manages the metadata layer of an encrypted block device:
//! redundant superblock copies at both ends of the device hold sixteen key
//! slots, each an AEAD-sealed copy of the data cipher key wrapped under a
//! key derived from a caller-supplied root key.
//!
//! # Features
//!
//! - **Slot-based enrollment**: up to 16 root keys unlock one device
//! - **Authenticated wrapping**: AES-128-GCM-SIV bound to the block header
//! - **Crash-consistent commit**: idempotent redundant writes, healed on open
//! - **Two back-ends**: file descriptors and driver queues, one contract
//! - **Memory safety**: all key material zeroized on reset and drop
//!
//! # Example
//!
//! ```no_run
//! use blockseal::{FdBackend, Superblock};
//!
//! // Initialize a device so "root key" unlocks slot 0.
//! let backend = FdBackend::open("/dev/some-block".as_ref(), 4096)?;
//! Superblock::create(backend, b"root key")?;
//!
//! // Unlock it and enroll a second key.
//! let backend = FdBackend::open("/dev/some-block".as_ref(), 4096)?;
//! let mut sb = Superblock::open(backend, b"root key", 0)?;
//! sb.enroll(b"other root key", 1)?;
//! # Ok::<(), blockseal::BlocksealError>(())
//! ```

pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod secret;
pub mod superblock;

// Re-export commonly used types
pub use config::Version;
pub use crypto::cipher::DataCipher;
pub use device::{
    Backend, BlockInfo, DeviceService, DriverBackend, FdBackend, SliceExtent, SliceRange,
    VolumeInfo,
};
pub use error::{BlocksealError, Result};
pub use secret::SecretBytes;
pub use superblock::Superblock;
