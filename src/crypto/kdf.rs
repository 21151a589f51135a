// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Per-slot wrapping key derivation.
//!
//! Each slot's wrap key and wrap IV come from HKDF-SHA256 keyed with the
//! caller's root key and salted with the device's instance GUID, so the
//! same root key yields unrelated wrapping material on different devices.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{BlocksealError, Result};
use crate::secret::SecretBytes;

/// Derivation labels must stay within this budget, terminator included.
pub const MAX_LABEL_LEN: usize = 16;

/// HKDF context for one (root key, device) pair.
///
/// Borrows the caller's root key for the duration of the derivation; the
/// superblock never retains root key bytes beyond the call.
pub struct SlotKdf<'a> {
    root_key: &'a [u8],
    instance_guid: &'a [u8],
}

impl<'a> SlotKdf<'a> {
    pub fn new(root_key: &'a [u8], instance_guid: &'a [u8]) -> Self {
        Self {
            root_key,
            instance_guid,
        }
    }

    /// Derives the wrap key for `slot`.
    pub fn wrap_key(&self, slot: u64, len: usize) -> Result<SecretBytes> {
        self.derive(&format!("wrap key {slot}"), len)
    }

    /// Derives the wrap IV for `slot`.
    pub fn wrap_iv(&self, slot: u64, len: usize) -> Result<SecretBytes> {
        self.derive(&format!("wrap iv {slot}"), len)
    }

    fn derive(&self, label: &str, len: usize) -> Result<SecretBytes> {
        debug_assert!(label.len() < MAX_LABEL_LEN);
        let hkdf = Hkdf::<Sha256>::new(Some(self.instance_guid), self.root_key);
        let mut out = SecretBytes::zero(len);
        hkdf.expand(label.as_bytes(), out.as_mut_slice())
            .map_err(|e| BlocksealError::Internal(format!("hkdf expand failed: {e}")))?;
        Ok(out)
    }
}
