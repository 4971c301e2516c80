use super::helpers::*;
use crate::{Error, Options};

// --------------------- Basic put / get ---------------------

#[test]
fn put_then_get_round_trips() {
    let mut store = test_store();
    store.put(b"key1", &[0x01, 0x02, 0x03]).unwrap();

    let mut buf = [0u8; 16];
    let n = store.get(b"key1", &mut buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf[..3], &[0x01, 0x02, 0x03]);
    assert_eq!(store.len(), 1);
    assert_invariants(&store);
}

#[test]
fn keys_are_raw_bytes_with_no_encoding() {
    let mut store = test_store();
    let key = [0xFF, 0x00, 0x80, 0xFE];
    store.put(&key, b"opaque").unwrap();
    assert_eq!(get_vec(&store, &key).unwrap(), b"opaque");

    // An image holding such keys stays readable across a remount.
    let (mut store, report) = remount(store);
    assert!(!report.data_loss());
    assert_eq!(get_vec(&store, &key).unwrap(), b"opaque");

    store.delete(&key).unwrap();
    assert_eq!(store.get(&key, &mut [0u8; 8]), Err(Error::NotFound));
}

#[test]
fn overwrite_returns_newest_value() {
    let mut store = test_store();
    store.put(b"k", b"aaaa").unwrap();
    store.put(b"k", b"bbbbbbbb").unwrap();

    assert_eq!(get_vec(&store, b"k").unwrap(), b"bbbbbbbb");
    // Overwriting is not a new key.
    assert_eq!(store.len(), 1);
    assert_invariants(&store);
}

#[test]
fn empty_value_round_trips() {
    let mut store = test_store();
    store.put(b"empty", b"").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(store.get(b"empty", &mut buf).unwrap(), 0);
    assert_eq!(store.value_size(b"empty").unwrap(), 0);
}

#[test]
fn each_materialization_burns_a_transaction_id() {
    let mut store = test_store();
    assert_eq!(store.transaction_count(), 0);

    store.put(b"a", b"1").unwrap();
    assert_eq!(store.transaction_count(), 1);
    store.put(b"a", b"2").unwrap();
    assert_eq!(store.transaction_count(), 2);
    store.delete(b"a").unwrap();
    assert_eq!(store.transaction_count(), 3);
}

#[test]
fn failed_write_still_burns_a_transaction_id() {
    let mut store = test_store();
    store.put(b"k", b"before").unwrap();
    let burned = store.transaction_count();

    // Device accepts one alignment unit of the entry, then dies.
    store.partition.fail_next_write_after(16);
    let err = store.put(b"k", b"after!").unwrap_err();
    assert!(matches!(err, Error::Flash(_)), "unexpected error {err:?}");

    // The id is spent even though the write failed, so the half-written
    // entry can never alias a later successful one.
    assert_eq!(store.transaction_count(), burned + 1);

    // The old value is still the visible one.
    assert_eq!(get_vec(&store, b"k").unwrap(), b"before");
    assert_invariants(&store);
}

// --------------------- Delete ---------------------

#[test]
fn delete_hides_key_and_decrements_len() {
    let mut store = test_store();
    store.put(b"x", b"1").unwrap();
    assert_eq!(store.len(), 1);

    store.delete(b"x").unwrap();
    assert_eq!(store.len(), 0);
    assert_eq!(store.get(b"x", &mut [0u8; 8]), Err(Error::NotFound));
}

#[test]
fn delete_of_absent_or_deleted_key_is_not_found() {
    let mut store = test_store();
    assert_eq!(store.delete(b"ghost"), Err(Error::NotFound));

    store.put(b"x", b"1").unwrap();
    store.delete(b"x").unwrap();
    assert_eq!(store.delete(b"x"), Err(Error::NotFound));
}

#[test]
fn put_resurrects_a_deleted_key() {
    let mut store = test_store();
    store.put(b"x", b"old").unwrap();
    store.delete(b"x").unwrap();

    store.put(b"x", b"new").unwrap();
    assert_eq!(get_vec(&store, b"x").unwrap(), b"new");
    assert_eq!(store.len(), 1);
}

// --------------------- Argument validation ---------------------

#[test]
fn key_length_bounds() {
    let mut store = test_store();

    assert!(matches!(
        store.put(b"", b"v"),
        Err(Error::InvalidArgument(_))
    ));

    let key_63 = "k".repeat(63);
    store.put(key_63.as_bytes(), b"v").unwrap();
    assert_eq!(get_vec(&store, key_63.as_bytes()).unwrap(), b"v");

    let key_64 = "k".repeat(64);
    assert!(matches!(
        store.put(key_64.as_bytes(), b"v"),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.get(key_64.as_bytes(), &mut [0u8; 4]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn value_must_fit_in_one_sector() {
    let mut store = test_store(); // 512-byte sectors

    // 16 header + 1 key + 495 value = 512 exactly: the largest legal entry.
    let max_value = vec![0xAB; 512 - 16 - 1];
    store.put(b"k", &max_value).unwrap();
    assert_eq!(get_vec(&store, b"k").unwrap(), max_value);

    // One byte more overflows the sector.
    let oversize = vec![0xAB; 512 - 16];
    assert!(matches!(
        store.put(b"j", &oversize),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn value_at_the_length_sentinel_is_rejected() {
    // Large sectors so the sector-fit check is not what trips.
    let mut store = store_with(2, 128 * 1024, Options::default());

    let sentinel_sized = vec![0u8; 0xFFFF];
    assert!(matches!(
        store.put(b"k", &sentinel_sized),
        Err(Error::InvalidArgument(_))
    ));

    let just_under = vec![0u8; 0xFFFE];
    store.put(b"k", &just_under).unwrap();
    assert_eq!(store.value_size(b"k").unwrap(), 0xFFFE);
}

// --------------------- Descriptor table capacity ---------------------

#[test]
fn descriptor_table_capacity_is_a_hard_limit() {
    let mut store = store_with(
        8,
        512,
        Options {
            max_entries: 2,
            ..Options::default()
        },
    );
    store.put(b"one", b"1").unwrap();
    store.put(b"two", b"2").unwrap();
    assert_eq!(store.put(b"three", b"3"), Err(Error::NoSpace));

    // A tombstoned key still occupies its slot.
    store.delete(b"one").unwrap();
    assert_eq!(store.put(b"three", b"3"), Err(Error::NoSpace));

    // Known keys keep working at capacity.
    store.put(b"two", b"22").unwrap();
    assert_eq!(get_vec(&store, b"two").unwrap(), b"22");
}

// --------------------- Hash collisions ---------------------

#[test]
fn colliding_key_is_rejected_not_mixed_up() {
    // "costarring" and "liquid" are a known 32-bit FNV-1a collision.
    let mut store = test_store();
    store.put(b"costarring", b"first").unwrap();

    assert_eq!(store.put(b"liquid", b"second"), Err(Error::HashCollision));
    // For reads the collider is simply absent.
    assert_eq!(store.get(b"liquid", &mut [0u8; 16]), Err(Error::NotFound));
    assert_eq!(store.delete(b"liquid"), Err(Error::NotFound));

    assert_eq!(get_vec(&store, b"costarring").unwrap(), b"first");
}

// --------------------- Mount gating ---------------------

#[test]
fn operations_require_a_mounted_store() {
    use entry::{Crc32, EntryFormat};
    use flash::MemFlash;

    let flash = MemFlash::new(4, 512, 16);
    let mut store = crate::KvStore::new(
        flash,
        Crc32::new(),
        EntryFormat::new(MAGIC),
        Options::default(),
    );

    assert_eq!(store.put(b"k", b"v"), Err(Error::NotMounted));
    assert_eq!(store.get(b"k", &mut [0u8; 4]), Err(Error::NotMounted));
    assert_eq!(store.delete(b"k"), Err(Error::NotMounted));
    assert_eq!(store.garbage_collect_partial(), Err(Error::NotMounted));

    store.mount().unwrap();
    store.put(b"k", b"v").unwrap();
}
