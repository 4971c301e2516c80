use super::*;
use flash::{FlashPartition, MemFlash};

const MAGIC: u32 = 0x464C_4E54; // "FLNT"

fn formats() -> EntryFormats {
    EntryFormats::from(EntryFormat::new(MAGIC))
}

fn write_entry(flash: &mut MemFlash, address: u32, key: &[u8], value: &[u8], txn: u32) -> Entry {
    let alignment = Entry::alignment_for(flash.alignment_bytes());
    let mut entry = Entry::valid(
        address,
        EntryFormat::new(MAGIC),
        key,
        value.len(),
        txn,
        alignment,
    );
    let written = entry
        .write(flash, &mut Crc32::new(), key, value)
        .expect("write failed");
    assert_eq!(written, entry.size());
    entry
}

// --------------------- Header codec ---------------------

#[test]
fn header_round_trips_through_bytes() {
    let header = EntryHeader {
        magic: MAGIC,
        checksum: 0xDEAD_BEEF,
        alignment_units: 1,
        key_length: 7,
        value_size_bytes: 300,
        transaction_id: 42,
    };
    assert_eq!(EntryHeader::from_bytes(&header.to_bytes()), header);
}

#[test]
fn header_layout_is_little_endian() {
    let header = EntryHeader {
        magic: 0x0403_0201,
        checksum: 0,
        alignment_units: 0,
        key_length: 1,
        value_size_bytes: 0x0605,
        transaction_id: 0x0A09_0807,
    };
    let bytes = header.to_bytes();
    assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(bytes[9], 1);
    assert_eq!(&bytes[10..12], &[0x05, 0x06]);
    assert_eq!(&bytes[12..16], &[0x07, 0x08, 0x09, 0x0A]);
}

// --------------------- Sizing ---------------------

#[test]
fn padded_size_rounds_to_alignment() {
    // 16 header + 4 key + 3 value = 23 -> 32.
    assert_eq!(Entry::padded_size(4, 3, 16), 32);
    // Exactly one alignment unit.
    assert_eq!(Entry::padded_size(0, 0, 16), 16);
    // Partition alignment below the minimum is raised to 16.
    assert_eq!(Entry::padded_size(4, 3, 1), 32);
    // Larger partition alignment wins.
    assert_eq!(Entry::padded_size(4, 3, 64), 64);
}

#[test]
fn tombstone_has_no_value_bytes() {
    let entry = Entry::tombstone(0, EntryFormat::new(MAGIC), b"gone", 9, 16);
    assert!(entry.deleted());
    assert_eq!(entry.value_size(), 0);
    // 16 + 4 key -> one 16-byte unit of padding.
    assert_eq!(entry.size(), 32);
}

// --------------------- Write / read round trip ---------------------

#[test]
fn entry_round_trips_through_flash() {
    let mut flash = MemFlash::new(1, 1024, 16);
    write_entry(&mut flash, 0, b"key1", &[1, 2, 3], 7);

    let entry = Entry::read(&flash, 0, &formats()).unwrap();
    assert_eq!(entry.magic(), MAGIC);
    assert_eq!(entry.transaction_id(), 7);
    assert_eq!(entry.key_length(), 4);
    assert_eq!(entry.value_size(), 3);
    assert!(!entry.deleted());

    let mut key_buf = [0u8; Entry::MAX_KEY_LENGTH];
    assert_eq!(entry.read_key(&flash, &mut key_buf).unwrap(), b"key1");

    let mut value = [0u8; 8];
    let n = entry.read_value(&flash, &mut value, 0).unwrap();
    assert_eq!(&value[..n], &[1, 2, 3]);

    entry.verify_in_flash(&flash, &mut Crc32::new()).unwrap();
}

#[test]
fn keys_are_raw_bytes_not_text() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let key = [0xFF, 0x00, 0x80, 0xFE];
    let entry = write_entry(&mut flash, 0, &key, b"v", 1);

    let mut key_buf = [0u8; Entry::MAX_KEY_LENGTH];
    assert_eq!(entry.read_key(&flash, &mut key_buf).unwrap(), &key);
    entry.verify_in_flash(&flash, &mut Crc32::new()).unwrap();
}

#[test]
fn read_value_honors_offset_and_buffer_size() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let entry = write_entry(&mut flash, 0, b"k", b"abcdefgh", 1);

    let mut buf = [0u8; 3];
    assert_eq!(entry.read_value(&flash, &mut buf, 0).unwrap(), 3);
    assert_eq!(&buf, b"abc");

    assert_eq!(entry.read_value(&flash, &mut buf, 6).unwrap(), 2);
    assert_eq!(&buf[..2], b"gh");

    assert_eq!(entry.read_value(&flash, &mut buf, 8).unwrap(), 0);
    assert_eq!(
        entry.read_value(&flash, &mut buf, 9),
        Err(EntryError::OffsetOutOfRange {
            offset: 9,
            value_size: 8
        })
    );
}

// --------------------- Parse classification ---------------------

#[test]
fn erased_flash_is_not_an_entry() {
    let flash = MemFlash::new(1, 1024, 16);
    assert_eq!(Entry::read(&flash, 0, &formats()), Err(EntryError::Erased));
}

#[test]
fn unknown_magic_is_corruption() {
    let mut flash = MemFlash::new(1, 1024, 16);
    write_entry(&mut flash, 0, b"k", b"v", 1);

    let other = EntryFormats::from(EntryFormat::new(0x1234_5678));
    assert_eq!(
        Entry::read(&flash, 0, &other),
        Err(EntryError::UnknownMagic { magic: MAGIC })
    );
}

#[test]
fn legacy_magic_still_parses_alongside_primary() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let legacy = EntryFormat::new(0x0BAD_CAFE);
    let mut entry = Entry::valid(0, legacy, b"old", 2, 3, 16);
    entry.write(&mut flash, &mut Crc32::new(), b"old", b"vv").unwrap();

    let both = EntryFormats::new(vec![EntryFormat::new(MAGIC), legacy]);
    let parsed = Entry::read(&flash, 0, &both).unwrap();
    assert_eq!(parsed.magic(), legacy.magic);
}

#[test]
fn zero_key_length_is_malformed() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let header = EntryHeader {
        magic: MAGIC,
        checksum: 0,
        alignment_units: 0,
        key_length: 0,
        value_size_bytes: 0,
        transaction_id: 1,
    };
    flash.write(0, &header.to_bytes()).unwrap();
    assert_eq!(
        Entry::read(&flash, 0, &formats()),
        Err(EntryError::Malformed("key length out of range"))
    );
}

// --------------------- Checksum ---------------------

#[test]
fn flipped_value_byte_fails_verification() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let entry = write_entry(&mut flash, 0, b"key", b"value", 1);

    // Clear a bit inside the stored value (16 header + 3 key = offset 19).
    flash.image_mut()[19 + 2] &= 0x7F;

    assert_eq!(
        entry.verify_in_flash(&flash, &mut Crc32::new()),
        Err(EntryError::ChecksumMismatch)
    );
}

#[test]
fn verify_against_caller_bytes_matches_flash_verify() {
    let mut flash = MemFlash::new(1, 1024, 16);
    let entry = write_entry(&mut flash, 0, b"key", b"value", 1);

    entry.verify(&mut Crc32::new(), b"key", b"value").unwrap();
    assert_eq!(
        entry.verify(&mut Crc32::new(), b"key", b"valuf"),
        Err(EntryError::ChecksumMismatch)
    );
}

#[test]
fn checksum_covers_transaction_id() {
    let mut flash = MemFlash::new(1, 1024, 16);
    write_entry(&mut flash, 0, b"key", b"value", 1);

    // Same key and value under a different transaction id must produce a
    // different stored checksum (header bytes 4..8).
    let mut other = Entry::valid(64, EntryFormat::new(MAGIC), b"key", 5, 2, 16);
    other
        .write(&mut flash, &mut Crc32::new(), b"key", b"value")
        .unwrap();

    let image = flash.image();
    assert_ne!(&image[4..8], &image[64 + 4..64 + 8]);
}

// --------------------- Alignment ---------------------

#[test]
fn wide_alignment_is_encoded_and_applied() {
    let mut flash = MemFlash::new(1, 4096, 64);
    let alignment = Entry::alignment_for(flash.alignment_bytes());
    assert_eq!(alignment, 64);

    let mut entry = Entry::valid(0, EntryFormat::new(MAGIC), b"k", 1, 1, alignment);
    entry.write(&mut flash, &mut Crc32::new(), b"k", b"x").unwrap();

    let parsed = Entry::read(&flash, 0, &formats()).unwrap();
    assert_eq!(parsed.size(), 64);
    assert_eq!(parsed.next_address(), 64);
}
