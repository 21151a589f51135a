// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! XTS-AES-256 data cipher binding.
//!
//! After a successful open, the driver path binds the unwrapped data key
//! and IV to a pair of [`DataCipher`] instances. The per-sector tweak is
//! the data IV interpreted as a little-endian 128-bit number plus the
//! sector index; the tweak limit caps how many sectors one key may cover.

use aes::cipher::KeyInit;
use aes::Aes256;
use xts_mode::Xts128;

use crate::error::{BlocksealError, Result};

/// XTS-AES-256 key length: two AES-256 keys.
pub const KEY_LEN: usize = 64;

/// Tweak base length.
pub const IV_LEN: usize = 16;

/// A one-direction view of the device body cipher.
///
/// XTS itself is symmetric in setup; encrypt and decrypt instances are
/// built separately so each side of the driver's queue owns its own state.
pub struct DataCipher {
    xts: Xts128<Aes256>,
    base_tweak: u128,
    tweak_limit: u64,
}

impl DataCipher {
    /// Builds a cipher over `key` (64 bytes) and `iv` (16 bytes).
    ///
    /// `tweak_limit` is the number of sectors addressable under this key;
    /// sectors at or past it are refused.
    pub fn new(key: &[u8], iv: &[u8], tweak_limit: u64) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(BlocksealError::Internal(format!(
                "data key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        if iv.len() != IV_LEN {
            return Err(BlocksealError::Internal(format!(
                "data iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let mut base = [0u8; IV_LEN];
        base.copy_from_slice(iv);
        let cipher_1 = Aes256::new_from_slice(&key[..32])
            .map_err(|_| BlocksealError::Internal("xts key half rejected".to_string()))?;
        let cipher_2 = Aes256::new_from_slice(&key[32..])
            .map_err(|_| BlocksealError::Internal("xts key half rejected".to_string()))?;
        Ok(Self {
            xts: Xts128::new(cipher_1, cipher_2),
            base_tweak: u128::from_le_bytes(base),
            tweak_limit,
        })
    }

    /// Encrypts one sector in place.
    pub fn encrypt_sector(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let tweak = self.tweak(sector, buf)?;
        self.xts.encrypt_sector(buf, tweak);
        Ok(())
    }

    /// Decrypts one sector in place.
    pub fn decrypt_sector(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let tweak = self.tweak(sector, buf)?;
        self.xts.decrypt_sector(buf, tweak);
        Ok(())
    }

    fn tweak(&self, sector: u64, buf: &[u8]) -> Result<[u8; IV_LEN]> {
        if sector >= self.tweak_limit {
            return Err(BlocksealError::InvalidArgs("sector beyond tweak limit"));
        }
        if buf.len() < 16 {
            return Err(BlocksealError::InvalidArgs(
                "sector buffer shorter than one cipher block",
            ));
        }
        Ok(self
            .base_tweak
            .wrapping_add(u128::from(sector))
            .to_le_bytes())
    }
}

impl std::fmt::Debug for DataCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCipher")
            .field("tweak_limit", &self.tweak_limit)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
