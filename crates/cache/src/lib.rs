//! # Cache — in-RAM bookkeeping for the entry log
//!
//! Nothing on flash is indexed; the partition holds only the concatenation
//! of entries. This crate provides the RAM-side structures the engine
//! rebuilds at mount and keeps current during operation:
//!
//! - [`EntryCache`] — a bounded table of [`KeyDescriptor`]s, one per distinct
//!   key ever observed, mapping a 32-bit key fingerprint to the latest
//!   transaction id, live/deleted state, and the flash addresses of the
//!   current copies.
//! - [`SectorDescriptor`] — per-sector byte accounting that partitions each
//!   sector into writable (unused tail), valid (live entries), and
//!   recoverable (stale or corrupt) bytes.
//!
//! Both tables are fixed-capacity: they allocate once at construction and
//! never grow. A full descriptor table rejects new keys with
//! [`CacheError::Full`] rather than allocating.
//!
//! ## Key fingerprint
//!
//! Keys are identified by a 32-bit FNV-1a hash ([`key_hash`]). The hash is
//! never persisted, so it may change between releases at the cost of one
//! remount scan. Two distinct keys hashing alike is a collision the store
//! surfaces on insert; the table never holds two descriptors with one hash.

use flash::Address;
use thiserror::Error;

/// 32-bit FNV-1a fingerprint of a key.
///
/// Offset basis `0x811C9DC5`, prime `0x0100_0193`, folded over the raw key
/// bytes. Keys carry no encoding constraint.
pub fn key_hash(key: &[u8]) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for &byte in key {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Errors from descriptor-table maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The descriptor table is at capacity.
    #[error("descriptor table full")]
    Full,

    /// Two copies of one logical write were found in the same sector, which
    /// defeats redundancy.
    #[error("redundant copies share a sector")]
    CopiesShareSector,

    /// More on-flash copies of one logical write than the configured
    /// redundancy level.
    #[error("more copies than the configured redundancy")]
    TooManyCopies,
}

/// Live/deleted state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Valid,
    Deleted,
}

/// One key's cached metadata: its fingerprint, the newest transaction id
/// observed for it, whether that newest entry is a tombstone, and the flash
/// addresses of the current copies (one per redundancy level, each in a
/// distinct sector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    hash: u32,
    transaction_id: u32,
    state: EntryState,
    addresses: Vec<Address>,
}

impl KeyDescriptor {
    /// Descriptor for a single just-observed copy.
    pub fn new(hash: u32, transaction_id: u32, state: EntryState, address: Address) -> Self {
        Self {
            hash,
            transaction_id,
            state,
            addresses: vec![address],
        }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }

    /// Addresses of the current copies, in write order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// The first (primary) copy's address.
    pub fn address(&self) -> Address {
        self.addresses[0]
    }

    /// Points the descriptor at a freshly persisted generation of this key.
    pub fn update(&mut self, transaction_id: u32, state: EntryState, addresses: Vec<Address>) {
        debug_assert!(!addresses.is_empty());
        self.transaction_id = transaction_id;
        self.state = state;
        self.addresses = addresses;
    }
}

/// Bounded table of key descriptors, at most one per hash.
#[derive(Debug)]
pub struct EntryCache {
    descriptors: Vec<KeyDescriptor>,
    max_entries: usize,
    redundancy: usize,
}

impl EntryCache {
    /// Creates an empty table for up to `max_entries` distinct keys holding
    /// `redundancy` copies each.
    pub fn new(max_entries: usize, redundancy: usize) -> Self {
        assert!(max_entries > 0 && redundancy > 0);
        Self {
            descriptors: Vec::with_capacity(max_entries),
            max_entries,
            redundancy,
        }
    }

    /// Index of the descriptor with this hash, if one exists.
    pub fn find(&self, hash: u32) -> Option<usize> {
        self.descriptors.iter().position(|d| d.hash == hash)
    }

    pub fn get(&self, index: usize) -> &KeyDescriptor {
        &self.descriptors[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut KeyDescriptor {
        &mut self.descriptors[index]
    }

    pub fn descriptors(&self) -> &[KeyDescriptor] {
        &self.descriptors
    }

    /// Adds a descriptor for a brand-new key (no descriptor with this hash
    /// may exist). Returns its index.
    pub fn insert(&mut self, descriptor: KeyDescriptor) -> Result<usize, CacheError> {
        debug_assert!(self.find(descriptor.hash).is_none());
        if self.descriptors.len() == self.max_entries {
            return Err(CacheError::Full);
        }
        self.descriptors.push(descriptor);
        Ok(self.descriptors.len() - 1)
    }

    /// Folds a just-scanned entry into the table. Used while walking flash,
    /// where entries for one key appear in arbitrary order:
    ///
    /// - unseen hash: append the descriptor;
    /// - newer transaction id: the incoming entry supersedes the cached one;
    /// - equal transaction id: a redundant copy of the same logical write —
    ///   valid only in a sector none of the known copies occupy;
    /// - older transaction id: the incoming entry is stale; drop it.
    pub fn add_or_merge(
        &mut self,
        incoming: KeyDescriptor,
        sector_size: usize,
    ) -> Result<(), CacheError> {
        debug_assert_eq!(incoming.addresses.len(), 1);
        let address = incoming.addresses[0];

        let Some(index) = self.find(incoming.hash) else {
            if self.descriptors.len() == self.max_entries {
                return Err(CacheError::Full);
            }
            self.descriptors.push(incoming);
            return Ok(());
        };

        let existing = &mut self.descriptors[index];
        if incoming.transaction_id > existing.transaction_id {
            *existing = incoming;
        } else if incoming.transaction_id == existing.transaction_id {
            let sector = address as usize / sector_size;
            if existing
                .addresses
                .iter()
                .any(|&a| a as usize / sector_size == sector)
            {
                return Err(CacheError::CopiesShareSector);
            }
            if existing.addresses.len() == self.redundancy {
                return Err(CacheError::TooManyCopies);
            }
            existing.addresses.push(address);
        }
        // Older transaction id: stale copy, nothing to record.
        Ok(())
    }

    /// Number of live (non-tombstoned) keys.
    pub fn present_entries(&self) -> usize {
        self.descriptors.iter().filter(|d| !d.deleted()).count()
    }

    /// Number of descriptors in use, tombstoned keys included.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn redundancy(&self) -> usize {
        self.redundancy
    }

    /// Drops every descriptor; the table capacity is retained.
    pub fn clear(&mut self) {
        self.descriptors.clear();
    }
}

/// Byte accounting for one erase sector.
///
/// Every byte of a sector is in exactly one of three buckets:
///
/// ```text
/// |----------- valid -----------|-- recoverable --|---- writable ----|
///   live entries                  stale + corrupt    unused tail
/// ```
///
/// Only `writable` and `valid` are stored; `recoverable` is derived, so the
/// three always sum to the sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorDescriptor {
    writable_bytes: usize,
    valid_bytes: usize,
}

impl SectorDescriptor {
    /// A fully erased sector: everything writable.
    pub fn new(sector_size: usize) -> Self {
        Self {
            writable_bytes: sector_size,
            valid_bytes: 0,
        }
    }

    pub fn writable_bytes(&self) -> usize {
        self.writable_bytes
    }

    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    /// Stale plus corrupt bytes, reclaimable by erasing the sector.
    pub fn recoverable_bytes(&self, sector_size: usize) -> usize {
        sector_size - self.writable_bytes - self.valid_bytes
    }

    pub fn is_empty(&self, sector_size: usize) -> bool {
        self.writable_bytes == sector_size
    }

    pub fn has_space(&self, bytes: usize) -> bool {
        self.writable_bytes >= bytes
    }

    pub fn add_valid_bytes(&mut self, bytes: usize) {
        self.valid_bytes += bytes;
    }

    pub fn remove_valid_bytes(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.valid_bytes);
        self.valid_bytes = self.valid_bytes.saturating_sub(bytes);
    }

    pub fn remove_writable_bytes(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.writable_bytes);
        self.writable_bytes = self.writable_bytes.saturating_sub(bytes);
    }

    pub fn set_writable_bytes(&mut self, bytes: usize) {
        self.writable_bytes = bytes;
    }
}
