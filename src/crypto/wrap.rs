// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Key wrapping with AES-128-GCM-SIV.
//!
//! The superblock header (type GUID, instance GUID, version) rides along as
//! associated data, so a slot only opens against the exact header bytes it
//! was sealed under. The wrap IV is derived, not random, which is why the
//! AEAD must be nonce-misuse resistant; do not swap in plain GCM.

use aes_gcm_siv::aead::{Aead, KeyInit, Payload};
use aes_gcm_siv::{Aes128GcmSiv, Nonce};
use zeroize::Zeroizing;

use crate::error::{BlocksealError, Result};

/// AES-128-GCM-SIV key length.
pub const KEY_LEN: usize = 16;

/// AES-128-GCM-SIV nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-128-GCM-SIV tag length.
pub const TAG_LEN: usize = 16;

/// Seals `ptext` under `(key, iv)` with `aad` bound into the tag.
///
/// Returns ciphertext of `ptext.len() + TAG_LEN` bytes.
pub fn seal(key: &[u8], iv: &[u8], aad: &[u8], ptext: &[u8]) -> Result<Vec<u8>> {
    let cipher = init(key, iv)?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: ptext, aad })
        .map_err(|_| BlocksealError::Internal("aead seal failed".to_string()))
}

/// Opens `ctext` sealed by [`seal`].
///
/// # Errors
///
/// Returns `AccessDenied` when authentication fails: wrong key, wrong IV,
/// mutated associated data, or a slot that was never sealed.
pub fn open(key: &[u8], iv: &[u8], aad: &[u8], ctext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = init(key, iv)?;
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ctext, aad })
        .map(Zeroizing::new)
        .map_err(|_| BlocksealError::AccessDenied)
}

fn init(key: &[u8], iv: &[u8]) -> Result<Aes128GcmSiv> {
    if iv.len() != NONCE_LEN {
        return Err(BlocksealError::Internal(format!(
            "wrap iv must be {NONCE_LEN} bytes, got {}",
            iv.len()
        )));
    }
    Aes128GcmSiv::new_from_slice(key)
        .map_err(|_| BlocksealError::Internal(format!("wrap key must be {KEY_LEN} bytes")))
}
