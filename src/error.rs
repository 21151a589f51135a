// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Error types for the Blockseal library.
//!
//! A single error enum covers every failure a superblock operation can
//! surface, from geometry probing through key unwrapping.

use thiserror::Error;

/// Main error type for all superblock operations.
#[derive(Error, Debug)]
pub enum BlocksealError {
    /// A parameter failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgs(&'static str),

    /// Key slot index outside the slot table.
    #[error("invalid key slot {0}")]
    InvalidSlot(u64),

    /// The operation requires a prior `init` or `open` that did not happen,
    /// or is not available on this back-end.
    #[error("operation not valid in this state: {0}")]
    BadState(&'static str),

    /// Block buffer allocation failed.
    #[error("allocation of {0} bytes failed")]
    NoMemory(usize),

    /// Device or slice geometry cannot hold the reserved metadata regions.
    #[error("device too small: {0}")]
    NoSpace(String),

    /// Unknown format version, foreign type GUID, or a block size that
    /// cannot be reconciled with the page size.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O failure, including short reads and writes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No metadata copy decrypted under the supplied root key and slot.
    #[error("access denied: no metadata copy could be unlocked")]
    AccessDenied,

    /// A cryptographic or device postcondition failed.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for Results using BlocksealError.
pub type Result<T> = std::result::Result<T, BlocksealError>;
