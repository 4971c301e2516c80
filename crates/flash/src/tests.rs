use super::*;

#[test]
fn fresh_partition_reads_erased() {
    let dev = MemFlash::new(2, 256, 16);
    let mut buf = [0u8; 32];
    dev.read(0, &mut buf).unwrap();
    assert_eq!(buf, [ERASED_BYTE; 32]);
    assert_eq!(dev.sector_count(), 2);
    assert_eq!(dev.size_bytes(), 512);
}

#[test]
fn write_clears_bits_only() {
    let mut dev = MemFlash::new(1, 256, 16);
    dev.write(0, &[0xF0; 16]).unwrap();

    // A second write over the same cells ANDs in; set bits cannot return.
    dev.write(0, &[0x0F; 16]).unwrap();

    let mut buf = [0u8; 16];
    dev.read(0, &mut buf).unwrap();
    assert_eq!(buf, [0x00; 16]);
}

#[test]
fn misaligned_writes_rejected() {
    let mut dev = MemFlash::new(1, 256, 16);

    let err = dev.write(8, &[0u8; 16]).unwrap_err();
    assert_eq!(err.bytes_written, 0);
    assert!(matches!(err.source, FlashError::Misaligned { .. }));

    let err = dev.write(0, &[0u8; 8]).unwrap_err();
    assert!(matches!(err.source, FlashError::Misaligned { .. }));

    // Reads have no alignment requirement.
    let mut one = [0u8; 1];
    dev.read(3, &mut one).unwrap();
}

#[test]
fn out_of_bounds_access_rejected() {
    let mut dev = MemFlash::new(1, 256, 16);
    let mut buf = [0u8; 32];
    assert_eq!(
        dev.read(240, &mut buf),
        Err(FlashError::OutOfBounds {
            address: 240,
            len: 32
        })
    );
    assert!(dev.write(256, &[0u8; 16]).is_err());
}

#[test]
fn erase_restores_all_ones() {
    let mut dev = MemFlash::new(2, 256, 16);
    dev.write(0, &[0u8; 256]).unwrap();
    dev.write(256, &[0u8; 16]).unwrap();

    dev.erase(0, 1).unwrap();

    let mut buf = [0u8; 256];
    dev.read(0, &mut buf).unwrap();
    assert_eq!(buf, [ERASED_BYTE; 256]);

    // Second sector untouched.
    let mut head = [0u8; 16];
    dev.read(256, &mut head).unwrap();
    assert_eq!(head, [0u8; 16]);
}

#[test]
fn erase_requires_sector_alignment() {
    let mut dev = MemFlash::new(2, 256, 16);
    assert_eq!(
        dev.erase(16, 1),
        Err(FlashError::UnalignedErase { address: 16 })
    );
}

#[test]
fn armed_fault_commits_partial_write() {
    let mut dev = MemFlash::new(1, 256, 16);
    dev.fail_next_write_after(40);

    let err = dev.write(0, &[0xAA; 64]).unwrap_err();
    // Commit count rounds down to the alignment.
    assert_eq!(err.bytes_written, 32);
    assert!(matches!(err.source, FlashError::WriteFault { .. }));

    // The committed prefix really is on the device; the tail stays erased.
    let mut buf = [0u8; 64];
    dev.read(0, &mut buf).unwrap();
    assert_eq!(&buf[..32], &[0xAA; 32]);
    assert_eq!(&buf[32..], &[ERASED_BYTE; 32]);

    // The fault is one-shot.
    assert_eq!(dev.write(64, &[0xAA; 64]).unwrap(), 64);
}

#[test]
fn from_image_round_trips() {
    let mut dev = MemFlash::new(2, 256, 16);
    dev.write(0, &[0x42; 16]).unwrap();

    let image = dev.image().to_vec();
    let copy = MemFlash::from_image(image, 256, 16);
    let mut buf = [0u8; 16];
    copy.read(0, &mut buf).unwrap();
    assert_eq!(buf, [0x42; 16]);
}

#[test]
fn align_up_rounds_correctly() {
    assert_eq!(align_up(0, 16), 0);
    assert_eq!(align_up(1, 16), 16);
    assert_eq!(align_up(16, 16), 16);
    assert_eq!(align_up(17, 16), 32);
    assert_eq!(align_up(100, 32), 128);
}
