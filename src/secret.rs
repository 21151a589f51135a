// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Owned secret buffers that are wiped on drop.
//!
//! Every piece of key material the superblock holds (wrap key, wrap IV,
//! data key, data IV) lives in a [`SecretBytes`], so error paths cannot
//! leave derived material behind.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

/// A growable byte buffer whose contents are zeroized on drop.
#[derive(Default)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a zero-filled buffer of `len` bytes.
    pub fn zero(len: usize) -> Self {
        Self(Zeroizing::new(vec![0u8; len]))
    }

    /// Creates a buffer of `len` bytes filled from the OS entropy source.
    pub fn random(len: usize) -> Self {
        let mut buf = Self::zero(len);
        OsRng.fill_bytes(&mut buf.0);
        buf
    }

    /// Copies `data` into a fresh secret buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        Self(Zeroizing::new(data.to_vec()))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wipes the contents and empties the buffer.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBytes")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
