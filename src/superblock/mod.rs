// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Superblock lifecycle.
//!
//! Several copies of the metadata for an encrypted device are kept at the
//! beginning and end of the device; [`LayoutIter`] walks their offsets. The
//! metadata block, or superblock, consists of a fixed type GUID, an
//! instance GUID, a 32-bit version, and a table of key slots: data cipher
//! key material sealed with a wrapping AEAD key derived from the
//! caller-provided root key and the slot index.
//!
//! Redundancy plus idempotent commit stand in for a journal. A commit
//! rewrites only the copies that differ, and a successful open republishes
//! the canonical block to every offset, healing any copy a crash or bit
//! flip left behind.

pub mod layout;

use log::{debug, warn};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::{Version, GUID_LEN, HEADER_LEN, NUM_SLOTS, PAGE_SIZE, RESERVED_SLICES, TYPE_GUID};
use crate::crypto::cipher::DataCipher;
use crate::crypto::kdf::SlotKdf;
use crate::crypto::wrap;
use crate::device::{Backend, BlockInfo, SliceExtent, VolumeInfo};
use crate::error::{BlocksealError, Result};
use crate::secret::SecretBytes;
use layout::LayoutIter;

/// An encrypted device's superblock, bound to one back-end.
///
/// The instance owns its block buffer and back-end exclusively; callers own
/// the root key bytes they pass in, which are never retained beyond the
/// call. All operations are serial per instance.
pub struct Superblock {
    backend: Backend,
    blk: BlockInfo,
    vm: VolumeInfo,
    has_vm: bool,
    block: Vec<u8>,
    guid: [u8; GUID_LEN],
    version: Option<Version>,
    header: [u8; HEADER_LEN],
    wrap_key: SecretBytes,
    wrap_iv: SecretBytes,
    data_key: SecretBytes,
    data_iv: SecretBytes,
}

impl Superblock {
    /// Initializes a new encrypted device, with `root_key` unlocking slot 0.
    ///
    /// Synthesizes a fresh superblock over a random backdrop, derives a new
    /// data key and IV, seals them into slot 0, and commits the block to
    /// every metadata offset.
    pub fn create(backend: impl Into<Backend>, root_key: &[u8]) -> Result<()> {
        if root_key.is_empty() {
            return Err(BlocksealError::InvalidArgs("root key must not be empty"));
        }
        let mut sb = Superblock::new(backend.into());
        sb.init()?;
        sb.create_block()?;
        sb.seal_slot(root_key, 0)?;
        sb.commit_block()?;
        Ok(())
    }

    /// Unlocks an existing device through `slot` and returns the handle.
    ///
    /// Scans every metadata offset in layout order and accepts the first
    /// copy that authenticates under the derived slot keys; the canonical
    /// block is then republished to the remaining offsets.
    ///
    /// # Errors
    ///
    /// `AccessDenied` when no copy opens under `(root_key, slot)`;
    /// `Unsupported` when every readable copy carries this format's type
    /// GUID but a version this build does not understand.
    pub fn open(backend: impl Into<Backend>, root_key: &[u8], slot: u64) -> Result<Superblock> {
        if root_key.is_empty() {
            return Err(BlocksealError::InvalidArgs("root key must not be empty"));
        }
        if slot >= NUM_SLOTS {
            return Err(BlocksealError::InvalidSlot(slot));
        }
        let mut sb = Superblock::new(backend.into());
        sb.init()?;
        sb.unseal(root_key, slot)?;
        Ok(sb)
    }

    /// Seals the data key under a new root key into `slot` and commits.
    ///
    /// Library-path only; driver-backed handles refuse.
    pub fn enroll(&mut self, root_key: &[u8], slot: u64) -> Result<()> {
        if self.backend.is_driver() {
            return Err(BlocksealError::BadState(
                "enroll is not available on a driver handle",
            ));
        }
        if root_key.is_empty() {
            return Err(BlocksealError::InvalidArgs("root key must not be empty"));
        }
        if slot >= NUM_SLOTS {
            return Err(BlocksealError::InvalidSlot(slot));
        }
        if self.block.is_empty() || self.data_key.is_empty() {
            return Err(BlocksealError::BadState("superblock not opened"));
        }
        self.seal_slot(root_key, slot)?;
        self.commit_block()
    }

    /// Overwrites `slot` with fresh randomness and commits.
    ///
    /// Library-path only. The revoked slot becomes indistinguishable from
    /// one that was never sealed.
    pub fn revoke(&mut self, slot: u64) -> Result<()> {
        if self.backend.is_driver() {
            return Err(BlocksealError::BadState(
                "revoke is not available on a driver handle",
            ));
        }
        if slot >= NUM_SLOTS {
            return Err(BlocksealError::InvalidSlot(slot));
        }
        if self.block.is_empty() {
            return Err(BlocksealError::BadState("superblock not opened"));
        }
        let slot_len = self.slot_len()?;
        let off = HEADER_LEN + slot_len * slot as usize;
        OsRng.fill_bytes(&mut self.block[off..off + slot_len]);
        self.commit_block()
    }

    /// Randomizes the whole superblock and writes it to every offset.
    ///
    /// Library-path only. Afterwards no root key opens the device, and the
    /// handle drops back to its uninitialized state.
    pub fn shred(&mut self) -> Result<()> {
        if self.backend.is_driver() {
            return Err(BlocksealError::BadState(
                "shred is not available on a driver handle",
            ));
        }
        if self.block.is_empty() {
            return Err(BlocksealError::BadState("superblock not opened"));
        }
        OsRng.fill_bytes(&mut self.block);
        for offset in self.layout() {
            self.write_block(offset)?;
        }
        self.reset();
        Ok(())
    }

    /// Returns the adjusted block and volume-manager geometry.
    pub fn get_info(&self) -> Result<(BlockInfo, VolumeInfo)> {
        if self.block.is_empty() {
            return Err(BlocksealError::BadState("superblock not initialized"));
        }
        Ok((self.blk, self.vm))
    }

    /// Whether the device sits on a real volume manager, as opposed to the
    /// slice geometry synthesized for plain devices.
    pub fn has_volume_manager(&self) -> bool {
        self.has_vm
    }

    /// Binds the unwrapped data key to an encrypt/decrypt cipher pair.
    ///
    /// Driver-path only; library handles refuse. The tweak limit caps the
    /// cipher at `u64::MAX / block_size` sectors.
    pub fn bind_ciphers(&self) -> Result<(DataCipher, DataCipher)> {
        if !self.backend.is_driver() {
            return Err(BlocksealError::BadState(
                "bind_ciphers requires a driver handle",
            ));
        }
        if self.block.is_empty() || self.data_key.is_empty() {
            return Err(BlocksealError::BadState("superblock not opened"));
        }
        let tweak_limit = u64::MAX / u64::from(self.blk.block_size);
        let encrypt = DataCipher::new(self.data_key.as_slice(), self.data_iv.as_slice(), tweak_limit)?;
        let decrypt = DataCipher::new(self.data_key.as_slice(), self.data_iv.as_slice(), tweak_limit)?;
        Ok((encrypt, decrypt))
    }

    fn new(backend: Backend) -> Self {
        Self {
            backend,
            blk: BlockInfo::default(),
            vm: VolumeInfo::default(),
            has_vm: false,
            block: Vec::new(),
            guid: [0u8; GUID_LEN],
            version: None,
            header: [0u8; HEADER_LEN],
            wrap_key: SecretBytes::new(),
            wrap_iv: SecretBytes::new(),
            data_key: SecretBytes::new(),
            data_iv: SecretBytes::new(),
        }
    }

    /// Drops every derived value: geometry, buffer, identity, and secrets.
    fn reset(&mut self) {
        self.blk = BlockInfo::default();
        self.vm = VolumeInfo::default();
        self.has_vm = false;
        self.block.clear();
        self.guid = [0u8; GUID_LEN];
        self.version = None;
        self.header = [0u8; HEADER_LEN];
        self.wrap_key.clear();
        self.wrap_iv.clear();
        self.data_key.clear();
        self.data_iv.clear();
    }

    /// Probes geometry and allocates the block buffer.
    ///
    /// A failed probe leaves the instance exactly as constructed.
    fn init(&mut self) -> Result<()> {
        self.reset();
        match self.probe() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn probe(&mut self) -> Result<()> {
        let mut blk = self.backend.block_info()?;
        if blk.block_size == 0 {
            return Err(BlocksealError::Unsupported(
                "device reports zero block size".to_string(),
            ));
        }
        // Align logical blocks to pages.
        if blk.block_size < PAGE_SIZE {
            if PAGE_SIZE % blk.block_size != 0 {
                return Err(BlocksealError::Unsupported(format!(
                    "block size {} does not divide the page size",
                    blk.block_size
                )));
            }
            blk.block_count /= u64::from(PAGE_SIZE / blk.block_size);
            blk.block_size = PAGE_SIZE;
        } else if blk.block_size % PAGE_SIZE != 0 {
            return Err(BlocksealError::Unsupported(format!(
                "block size {} is not page aligned",
                blk.block_size
            )));
        }

        let block_len = blk.block_size as usize;
        let mut block = Vec::new();
        block
            .try_reserve_exact(block_len)
            .map_err(|_| BlocksealError::NoMemory(block_len))?;
        block.resize(block_len, 0);

        let reserved = u64::from(blk.block_size) * RESERVED_SLICES;
        let (mut vm, has_vm) = match self.backend.volume_query() {
            Ok(vm) => {
                // A real volume manager backs this device.
                if vm.slice_size < reserved || vm.vslice_count < 2 {
                    return Err(BlocksealError::NoSpace(format!(
                        "slice size {} with {} virtual slices cannot hold {} reserved bytes per end",
                        vm.slice_size, vm.vslice_count, reserved
                    )));
                }
                let last = vm.vslice_count - 1;
                let ranges = self.backend.vslice_query(&[last])?;
                let range = ranges
                    .first()
                    .filter(|r| r.count != 0)
                    .ok_or_else(|| {
                        BlocksealError::Internal(
                            "malformed virtual slice query response".to_string(),
                        )
                    })?;
                // The tail metadata region needs the last slice mapped.
                if !range.allocated {
                    self.backend.extend(SliceExtent {
                        offset: last,
                        length: 1,
                    })?;
                }
                (vm, true)
            }
            Err(BlocksealError::Unsupported(_)) => {
                // Plain device. Synthesize slice geometry so one set of
                // layout logic covers both cases.
                if blk.block_count / 2 < RESERVED_SLICES {
                    return Err(BlocksealError::NoSpace(format!(
                        "{} blocks cannot hold {} reserved blocks per end",
                        blk.block_count, RESERVED_SLICES
                    )));
                }
                (
                    VolumeInfo {
                        slice_size: reserved,
                        vslice_count: blk.block_count / RESERVED_SLICES,
                    },
                    false,
                )
            }
            Err(e) => return Err(e),
        };

        // Exclude the two reserved slices from the exposed geometry.
        vm.vslice_count -= 2;
        blk.block_count = blk
            .block_count
            .checked_sub((vm.slice_size / u64::from(blk.block_size)) * 2)
            .ok_or_else(|| {
                BlocksealError::NoSpace("reserved slices exceed the device".to_string())
            })?;

        self.blk = blk;
        self.vm = vm;
        self.has_vm = has_vm;
        self.block = block;
        Ok(())
    }

    fn layout(&self) -> LayoutIter {
        LayoutIter::new(&self.blk, &self.vm)
    }

    fn slot_len(&self) -> Result<usize> {
        Ok(self
            .version
            .ok_or(BlocksealError::BadState("superblock not configured"))?
            .slot_len())
    }

    /// Validates that the block can hold this version's slot table and
    /// records the algorithm selection.
    fn configure(&mut self, version: Version) -> Result<()> {
        if (self.blk.block_size as usize) < version.min_block_len() {
            return Err(BlocksealError::Unsupported(format!(
                "block size {} cannot hold the slot table ({} bytes)",
                self.blk.block_size,
                version.min_block_len()
            )));
        }
        self.version = Some(version);
        Ok(())
    }

    /// Synthesizes a fresh superblock in the buffer.
    fn create_block(&mut self) -> Result<()> {
        // Random backdrop: uninitialized slots and padding must be
        // indistinguishable from revoked ones.
        OsRng.fill_bytes(&mut self.block);

        self.block[..GUID_LEN].copy_from_slice(&TYPE_GUID);

        // RFC 4122 variant 1, version 4 instance GUID.
        let mut guid = [0u8; GUID_LEN];
        OsRng.fill_bytes(&mut guid);
        guid[6] = (guid[6] & 0x0F) | 0x40;
        guid[8] = (guid[8] & 0x3F) | 0x80;
        self.guid = guid;
        self.block[GUID_LEN..2 * GUID_LEN].copy_from_slice(&guid);

        let version = Version::DEFAULT;
        self.configure(version)?;
        self.block[2 * GUID_LEN..HEADER_LEN].copy_from_slice(&version.to_wire().to_be_bytes());

        self.data_key = SecretBytes::random(version.data_key_len());
        self.data_iv = SecretBytes::random(version.data_iv_len());
        self.header.copy_from_slice(&self.block[..HEADER_LEN]);
        Ok(())
    }

    /// Derives the wrapping key and IV for `(root_key, slot)`, salted by
    /// the instance GUID. Previous wrap material is wiped on replacement.
    fn derive_slot_keys(&mut self, root_key: &[u8], slot: u64) -> Result<()> {
        let version = self
            .version
            .ok_or(BlocksealError::BadState("superblock not configured"))?;
        let kdf = SlotKdf::new(root_key, &self.guid);
        self.wrap_key = kdf.wrap_key(slot, version.wrap_key_len())?;
        self.wrap_iv = kdf.wrap_iv(slot, version.wrap_iv_len())?;
        Ok(())
    }

    /// Seals `data_key || data_iv` into `slot`, binding the header bytes as
    /// associated data.
    fn seal_slot(&mut self, root_key: &[u8], slot: u64) -> Result<()> {
        let version = self
            .version
            .ok_or(BlocksealError::BadState("superblock not configured"))?;
        self.derive_slot_keys(root_key, slot)?;

        let mut ptext = SecretBytes::zero(version.data_key_len() + version.data_iv_len());
        {
            let buf = ptext.as_mut_slice();
            buf[..version.data_key_len()].copy_from_slice(self.data_key.as_slice());
            buf[version.data_key_len()..].copy_from_slice(self.data_iv.as_slice());
        }
        let ctext = wrap::seal(
            self.wrap_key.as_slice(),
            self.wrap_iv.as_slice(),
            &self.header,
            ptext.as_slice(),
        )?;
        if ctext.len() != version.slot_len() {
            return Err(BlocksealError::Internal(format!(
                "sealed slot is {} bytes, expected {}",
                ctext.len(),
                version.slot_len()
            )));
        }
        let off = HEADER_LEN + version.slot_len() * slot as usize;
        self.block[off..off + version.slot_len()].copy_from_slice(&ctext);
        Ok(())
    }

    /// Tries to unlock `slot` from the block currently in the buffer.
    fn open_block(&mut self, root_key: &[u8], slot: u64) -> Result<()> {
        if self.block[..GUID_LEN] != TYPE_GUID {
            return Err(BlocksealError::Unsupported(
                "block does not carry the superblock type GUID".to_string(),
            ));
        }
        self.guid.copy_from_slice(&self.block[GUID_LEN..2 * GUID_LEN]);

        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[2 * GUID_LEN..HEADER_LEN]);
        let version = Version::from_wire(u32::from_be_bytes(word))?;
        self.configure(version)?;
        self.derive_slot_keys(root_key, slot)?;

        self.header.copy_from_slice(&self.block[..HEADER_LEN]);
        let off = HEADER_LEN + version.slot_len() * slot as usize;
        let ctext = &self.block[off..off + version.slot_len()];
        let ptext = wrap::open(
            self.wrap_key.as_slice(),
            self.wrap_iv.as_slice(),
            &self.header,
            ctext,
        )?;

        let key_len = version.data_key_len();
        let iv_len = version.data_iv_len();
        if ptext.len() != key_len + iv_len {
            return Err(BlocksealError::Internal(format!(
                "{} unexpected plaintext bytes in slot {slot}",
                ptext.len().abs_diff(key_len + iv_len)
            )));
        }
        self.data_key = SecretBytes::copy_from(&ptext[..key_len]);
        self.data_iv = SecretBytes::copy_from(&ptext[key_len..]);
        Ok(())
    }

    /// Scans every metadata offset for a copy that opens under
    /// `(root_key, slot)`; heals the others on success.
    ///
    /// The aggregate error is `AccessDenied` unless every readable copy
    /// carried this format's type GUID and still failed before
    /// authentication, which means the device is ours but unreadable by
    /// this build (unknown version).
    fn unseal(&mut self, root_key: &[u8], slot: u64) -> Result<()> {
        let mut attempted = false;
        let mut version_rejected = true;
        for offset in self.layout() {
            if let Err(e) = self.read_block(offset) {
                warn!("failed to read metadata block at offset {offset}: {e}");
                continue;
            }
            attempted = true;
            match self.open_block(root_key, slot) {
                Ok(()) => return self.commit_block(),
                Err(e) => {
                    let recognized = self.block[..GUID_LEN] == TYPE_GUID;
                    if !recognized || !matches!(e, BlocksealError::Unsupported(_)) {
                        version_rejected = false;
                    }
                    debug!("failed to open metadata block at offset {offset}: {e}");
                }
            }
        }
        if attempted && version_rejected {
            return Err(BlocksealError::Unsupported(
                "no metadata copy carries a version this build understands".to_string(),
            ));
        }
        Err(BlocksealError::AccessDenied)
    }

    /// Publishes the buffer to every metadata offset, skipping copies that
    /// already match.
    ///
    /// Individual write failures are logged and swallowed: redundancy is
    /// best-effort, and `open` accepts any one good copy.
    fn commit_block(&mut self) -> Result<()> {
        let canonical = self.block.clone();
        let mut on_disk = vec![0u8; canonical.len()];
        for offset in self.layout() {
            if self.backend.read_at(offset, &mut on_disk).is_ok() && on_disk == canonical {
                continue;
            }
            if let Err(e) = self.backend.write_at(offset, &canonical) {
                warn!("metadata write at offset {offset} failed: {e}");
            }
        }
        Ok(())
    }

    fn read_block(&mut self, offset: u64) -> Result<()> {
        self.backend.read_at(offset, &mut self.block)
    }

    fn write_block(&mut self, offset: u64) -> Result<()> {
        self.backend.write_at(offset, &self.block)
    }
}

impl std::fmt::Debug for Superblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Superblock")
            .field("blk", &self.blk)
            .field("vm", &self.vm)
            .field("has_vm", &self.has_vm)
            .field("version", &self.version)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}
