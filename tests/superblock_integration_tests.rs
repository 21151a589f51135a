// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Blockseal Contributors
//! Superblock Integration Tests
//!
//! End-to-end coverage of the superblock lifecycle over both back-ends:
//! - Create/open round trips and redundant copy placement
//! - Multi-key enrollment and revocation
//! - Redundancy healing and idempotent commit
//! - Header binding and format rejection
//! - Geometry normalization and volume-manager devices
//! - Shred

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use blockseal::config::{GUID_LEN, HEADER_LEN, NUM_SLOTS, TYPE_GUID};
use blockseal::{BlocksealError, DeviceService, FdBackend, Superblock, Version};

/// Block size every test device normalizes to.
const BLOCK: u64 = 4096;

/// Standard test device: 4 KiB blocks, 1024 of them, no volume manager.
const BLOCKS: u64 = 1024;

/// Metadata copy offsets of the standard test device: two blocks at each
/// end, after the reserved-slice adjustment.
const COPIES: [u64; 4] = [0, BLOCK, (BLOCKS - 2) * BLOCK, (BLOCKS - 1) * BLOCK];

/// Creates a zero-filled file standing in for a block device.
fn file_device(bytes: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp device");
    file.write_all(&vec![0u8; bytes as usize]).unwrap();
    file.flush().unwrap();
    file
}

fn fd(file: &NamedTempFile, block_size: u32) -> FdBackend {
    FdBackend::open(file.path(), block_size).expect("failed to open device file")
}

fn read_at(path: &Path, offset: u64, len: usize) -> Vec<u8> {
    let mut file = OpenOptions::new().read(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).unwrap();
    buf
}

fn write_at(path: &Path, offset: u64, data: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(data).unwrap();
    file.sync_all().unwrap();
}

/// Standard created device unlocked by "rootkey-A" in slot 0.
fn created_device() -> NamedTempFile {
    let file = file_device(BLOCKS * BLOCK);
    Superblock::create(fd(&file, BLOCK as u32), b"rootkey-A").unwrap();
    file
}

// =============================================================================
// Creation and copy placement
// =============================================================================

#[test]
fn test_create_places_identical_copies_at_both_ends() {
    let file = created_device();

    let canonical = read_at(file.path(), COPIES[0], BLOCK as usize);
    assert_eq!(&canonical[..GUID_LEN], &TYPE_GUID);
    for &offset in &COPIES[1..] {
        let copy = read_at(file.path(), offset, BLOCK as usize);
        assert_eq!(copy, canonical, "copy at offset {offset} diverges");
        assert_eq!(&copy[..GUID_LEN], &TYPE_GUID);
    }

    Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
}

#[test]
fn test_only_creating_key_and_slot_open() {
    let file = created_device();

    Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
    for slot in 1..NUM_SLOTS {
        assert!(
            matches!(
                Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", slot),
                Err(BlocksealError::AccessDenied)
            ),
            "unsealed slot {slot} opened"
        );
    }
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-B", 0),
        Err(BlocksealError::AccessDenied)
    ));
}

#[test]
fn test_padding_not_zeroed() {
    let file = created_device();
    let block = read_at(file.path(), 0, BLOCK as usize);
    let slot_table_end = HEADER_LEN + NUM_SLOTS as usize * Version::DEFAULT.slot_len();
    let padding = &block[slot_table_end..];
    assert!(
        padding.iter().filter(|&&b| b == 0).count() < padding.len() / 2,
        "padding past the slot table looks zeroed"
    );
}

// =============================================================================
// Enrollment and revocation
// =============================================================================

#[test]
fn test_enroll_second_key() {
    let file = created_device();

    let mut sb = Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
    sb.enroll(b"rootkey-B", 3).unwrap();
    drop(sb);

    Superblock::open(fd(&file, BLOCK as u32), b"rootkey-B", 3).unwrap();
    // The enrolling key does not leak into the new slot.
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 3),
        Err(BlocksealError::AccessDenied)
    ));
}

#[test]
fn test_enrolled_slot_yields_same_data_key() {
    let file = created_device();
    let mut sb = Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
    sb.enroll(b"rootkey-B", 3).unwrap();
    drop(sb);

    // Serve the same on-disk artifact through the driver path, where the
    // data key is observable through the bound cipher.
    let bytes = std::fs::read(file.path()).unwrap();
    let service = DeviceService::new(BLOCK as u32, BLOCKS);
    service.write(0, &bytes);

    let via_a = Superblock::open(service.serve().unwrap(), b"rootkey-A", 0).unwrap();
    let via_b = Superblock::open(service.serve().unwrap(), b"rootkey-B", 3).unwrap();

    let (enc_a, _) = via_a.bind_ciphers().unwrap();
    let (enc_b, _) = via_b.bind_ciphers().unwrap();
    let mut sector_a = vec![0x5Au8; BLOCK as usize];
    let mut sector_b = vec![0x5Au8; BLOCK as usize];
    enc_a.encrypt_sector(11, &mut sector_a).unwrap();
    enc_b.encrypt_sector(11, &mut sector_b).unwrap();
    assert_eq!(
        sector_a, sector_b,
        "both slots must unwrap the same data key and IV"
    );
}

#[test]
fn test_revoke_slot() {
    let file = created_device();

    let mut sb = Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
    sb.enroll(b"rootkey-B", 3).unwrap();
    sb.revoke(0).unwrap();
    drop(sb);

    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0),
        Err(BlocksealError::AccessDenied)
    ));
    Superblock::open(fd(&file, BLOCK as u32), b"rootkey-B", 3).unwrap();
}

#[test]
fn test_slot_out_of_range() {
    let file = created_device();
    let mut sb = Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();

    assert!(matches!(
        sb.enroll(b"rootkey-B", NUM_SLOTS),
        Err(BlocksealError::InvalidSlot(_))
    ));
    assert!(matches!(
        sb.revoke(NUM_SLOTS),
        Err(BlocksealError::InvalidSlot(_))
    ));
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 99),
        Err(BlocksealError::InvalidSlot(99))
    ));
}

// =============================================================================
// Redundancy, healing, idempotent commit
// =============================================================================

#[test]
fn test_open_heals_corrupted_copy() {
    let file = created_device();

    // Trash the first copy entirely.
    write_at(file.path(), COPIES[0], &vec![0xFFu8; BLOCK as usize]);

    Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0)
        .expect("a surviving copy must open the device");

    let healed = read_at(file.path(), COPIES[0], BLOCK as usize);
    let reference = read_at(file.path(), COPIES[1], BLOCK as usize);
    assert_eq!(healed, reference, "open must republish the canonical block");
}

#[test]
fn test_every_single_copy_suffices() {
    for keep in 0..COPIES.len() {
        let file = created_device();
        for (i, &offset) in COPIES.iter().enumerate() {
            if i != keep {
                write_at(file.path(), offset, &vec![0u8; BLOCK as usize]);
            }
        }
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0)
            .unwrap_or_else(|e| panic!("copy {keep} alone failed to open: {e}"));
    }
}

#[test]
fn test_commit_skips_identical_copies() {
    let service = DeviceService::new(BLOCK as u32, BLOCKS);
    Superblock::create(service.serve().unwrap(), b"rootkey-A").unwrap();
    let after_create = service.write_count();
    assert_eq!(after_create, 4, "create must publish each copy once");

    // All copies already match, so the commit-on-open writes nothing.
    Superblock::open(service.serve().unwrap(), b"rootkey-A", 0).unwrap();
    assert_eq!(service.write_count(), after_create);

    // With one copy corrupted, exactly that copy is rewritten.
    service.write(BLOCK, &vec![0xEEu8; BLOCK as usize]);
    Superblock::open(service.serve().unwrap(), b"rootkey-A", 0).unwrap();
    assert_eq!(service.write_count(), after_create + 1);
}

// =============================================================================
// Header binding and format rejection
// =============================================================================

#[test]
fn test_instance_guid_flip_breaks_authentication() {
    let file = created_device();

    // Flip one bit of the instance GUID in every copy: the header is the
    // AEAD associated data, so each slot must refuse to open.
    for &offset in &COPIES {
        let mut byte = read_at(file.path(), offset + GUID_LEN as u64 + 1, 1);
        byte[0] ^= 0x01;
        write_at(file.path(), offset + GUID_LEN as u64 + 1, &byte);
    }
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0),
        Err(BlocksealError::AccessDenied)
    ));
}

#[test]
fn test_foreign_type_guid_rejected() {
    let file = created_device();
    for &offset in &COPIES {
        let mut guid = read_at(file.path(), offset, GUID_LEN);
        guid[0] ^= 0x80;
        write_at(file.path(), offset, &guid);
    }
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0),
        Err(BlocksealError::Unsupported(_))
    ));
}

#[test]
fn test_corrupted_version_rejected() {
    let file = created_device();
    for &offset in &COPIES {
        write_at(
            file.path(),
            offset + 2 * GUID_LEN as u64,
            &0xDEADBEEFu32.to_be_bytes(),
        );
    }
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0),
        Err(BlocksealError::Unsupported(_))
    ));
}

// =============================================================================
// Geometry
// =============================================================================

#[test]
fn test_small_blocks_normalize_to_pages() {
    // 4096 blocks of 512 bytes collapse to 512 pages; two reserved slices
    // of two pages each come off the exposed count.
    let raw_blocks = 4096u64;
    let file = file_device(raw_blocks * 512);
    Superblock::create(fd(&file, 512), b"rootkey-A").unwrap();

    let sb = Superblock::open(fd(&file, 512), b"rootkey-A", 0).unwrap();
    let (blk, _) = sb.get_info().unwrap();
    assert_eq!(blk.block_size, 4096);
    assert_eq!(blk.block_count, raw_blocks / 8 - 4);
}

#[test]
fn test_misaligned_block_size_unsupported() {
    let file = file_device(96 * 4096);
    let result = Superblock::create(fd(&file, 3 * 4096 / 2), b"rootkey-A");
    assert!(matches!(result, Err(BlocksealError::Unsupported(_))));
}

#[test]
fn test_volume_manager_device() {
    // 1 MiB slices, 8 virtual slices, last one initially unallocated.
    let service = DeviceService::new(BLOCK as u32, 0).with_volume_manager(1 << 20, 8);
    assert!(!service.is_allocated(7));

    Superblock::create(service.serve().unwrap(), b"rootkey-A").unwrap();
    assert!(
        service.is_allocated(7),
        "init must allocate the trailing metadata slice"
    );

    let sb = Superblock::open(service.serve().unwrap(), b"rootkey-A", 0).unwrap();
    let (_, vm) = sb.get_info().unwrap();
    assert_eq!(vm.vslice_count, 6, "reserved slices stay hidden");
    assert!(sb.has_volume_manager());
}

#[test]
fn test_undersized_volume_manager_refused() {
    // Slices smaller than the reserved region per end.
    let service = DeviceService::new(BLOCK as u32, 0).with_volume_manager(BLOCK, 8);
    assert!(matches!(
        Superblock::create(service.serve().unwrap(), b"rootkey-A"),
        Err(BlocksealError::NoSpace(_))
    ));
}

// =============================================================================
// Shred
// =============================================================================

#[test]
fn test_shred_destroys_all_copies() {
    let file = created_device();

    let mut sb = Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0).unwrap();
    sb.shred().unwrap();
    // The handle resets; further metadata operations need a fresh open.
    assert!(matches!(sb.get_info(), Err(BlocksealError::BadState(_))));
    drop(sb);

    for &offset in &COPIES {
        let copy = read_at(file.path(), offset, GUID_LEN);
        assert_ne!(&copy[..], &TYPE_GUID, "copy at {offset} survived shred");
    }
    assert!(matches!(
        Superblock::open(fd(&file, BLOCK as u32), b"rootkey-A", 0),
        Err(BlocksealError::AccessDenied)
    ));
}
