use entry::{Crc32, EntryFormat};
use flash::MemFlash;

use crate::{KvStore, MountReport, Options};

pub const MAGIC: u32 = 0x464C_4E54; // "FLNT"

pub type TestStore = KvStore<MemFlash, Crc32>;

/// A mounted store over a fresh partition.
pub fn store_with(sectors: usize, sector_size: usize, options: Options) -> TestStore {
    let flash = MemFlash::new(sectors, sector_size, 16);
    let mut store = KvStore::new(flash, Crc32::new(), EntryFormat::new(MAGIC), options);
    store.mount().expect("mount of a blank partition failed");
    store
}

/// The default geometry used across these tests: 8 sectors of 512 bytes.
pub fn test_store() -> TestStore {
    store_with(8, 512, Options::default())
}

/// Tears the store down to its partition and mounts a fresh store over it,
/// simulating a reboot.
pub fn remount_with(store: TestStore, options: Options) -> (TestStore, MountReport) {
    let flash = store.into_partition();
    let mut store = KvStore::new(flash, Crc32::new(), EntryFormat::new(MAGIC), options);
    let report = store.mount().expect("remount failed");
    (store, report)
}

pub fn remount(store: TestStore) -> (TestStore, MountReport) {
    remount_with(store, Options::default())
}

/// Reads the full value for `key`, sized to fit anything these tests store.
pub fn get_vec(store: &TestStore, key: &[u8]) -> crate::Result<Vec<u8>> {
    let mut buf = vec![0u8; 4096];
    let n = store.get(key, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Asserts the per-sector byte accounting is sane and the spare-sector
/// rule holds.
pub fn assert_invariants(store: &TestStore) {
    let sector_size = store.sector_size();
    for (index, sector) in store.sectors.iter().enumerate() {
        assert!(
            sector.writable_bytes() + sector.valid_bytes() <= sector_size,
            "sector {index} over-accounted: {} writable + {} valid > {sector_size}",
            sector.writable_bytes(),
            sector.valid_bytes()
        );
    }
    assert!(
        store.sectors.iter().any(|s| s.is_empty(sector_size)),
        "spare-sector rule violated: no empty sector"
    );
}
