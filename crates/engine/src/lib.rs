//! # Engine - FlintKV Storage Engine
//!
//! A log-structured key-value store for NOR-flash partitions on
//! resource-constrained devices. Values are small binary blobs indexed by
//! short byte-string keys; durability comes from the append-only entry log,
//! overwrites from append + garbage collection, and wear-leveling from
//! rotating new writes across erase sectors.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                   KVSTORE                       │
//! │                                                 │
//! │ write.rs → allocator → entry codec → flash      │
//! │              |                                  │
//! │              |  (no sector fits?)               │
//! │              |            yes                   │
//! │              v                                  │
//! │           gc.rs → relocate live entries         │
//! │                 → erase victim sector           │
//! │                                                 │
//! │ read.rs → descriptor cache → entry codec        │
//! │                                                 │
//! │ recovery.rs → full-partition scan at mount      │
//! │             → rebuilds cache + sector counts    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `lib.rs`     | `KvStore` struct, options, accessors, sector math    |
//! | [`error`]    | The operation error taxonomy                         |
//! | [`recovery`] | Mount-time scan, corruption handling, spare sector   |
//! | [`alloc`]    | Destination-sector selection and wear-leveling       |
//! | [`write`]    | `put()` / `delete()`, entry append, id burning       |
//! | [`read`]     | `get()` / `value_size()`, verify-on-read             |
//! | [`gc`]       | Victim selection, live-entry relocation, erase       |
//! | [`iter`]     | Iteration over live items                            |
//!
//! ## Sector lifecycle
//!
//! ```text
//! ┌───────┐ append  ┌────────┐ tail used up ┌──────┐
//! │ EMPTY │────────>│ ACTIVE │─────────────>│ FULL │
//! └───────┘         └────────┘              └──────┘
//!     ^                                         │ entries go stale
//!     │    erase    ┌──────────────────────┐    v
//!     └─────────────│ GC victim: relocate  │<───┘
//!                   │ live entries, erase  │
//!                   └──────────────────────┘
//! ```
//!
//! At least one sector is kept fully erased at all times (outside of a GC
//! round) so the collector always has somewhere to move live entries. The
//! allocator enforces this spare-sector rule and mount restores it.
//!
//! ## Crash safety
//!
//! There is no superblock, index, or journal: the partition holds nothing
//! but entries, and mount rebuilds all RAM state by scanning them. Every
//! entry carries a store-wide monotonic transaction id; whichever entry for
//! a key has the highest id wins, so a crash between appending a new
//! generation and the old one going stale resolves itself at the next
//! mount.

mod alloc;
mod error;
mod gc;
mod iter;
mod read;
mod recovery;
mod write;

pub use error::{Error, Result};
pub use iter::{Entries, Item};
pub use recovery::MountReport;

use cache::{EntryCache, SectorDescriptor};
use entry::{ChecksumAlgorithm, Entry, EntryFormats};
use flash::{Address, FlashPartition};

/// How aggressively `put` may garbage collect when no sector fits the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOnWrite {
    /// Never collect during a write; fail instead.
    Disabled,
    /// Collect at most one sector, then retry once.
    OneSector,
    /// Keep collecting until the entry fits or nothing is reclaimable.
    AsNeeded,
}

/// When corruption found at mount gets cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRecovery {
    /// Scrub locked sectors with a full garbage collection before mount
    /// returns.
    Immediate,
    /// Leave locked sectors to be reclaimed by later GC pressure.
    Lazy,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Garbage-collection policy for space-starved writes.
    pub gc_on_write: GcOnWrite,
    /// Handling of corruption discovered at mount.
    pub recovery: ErrorRecovery,
    /// Re-verify an entry's checksum when reading a whole value.
    pub verify_on_read: bool,
    /// Re-verify an entry's checksum from flash after writing it.
    pub verify_on_write: bool,
    /// Capacity of the key-descriptor table (distinct keys ever seen,
    /// tombstoned keys included). The table never grows past this.
    pub max_entries: usize,
    /// On-flash copies kept per entry, each in a distinct sector.
    pub redundancy: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            gc_on_write: GcOnWrite::OneSector,
            recovery: ErrorRecovery::Lazy,
            verify_on_read: true,
            verify_on_write: true,
            max_entries: 256,
            redundancy: 1,
        }
    }
}

/// Partition space accounting, aggregated over all sectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Bytes available for appends. The first empty sector is excluded: it
    /// is the reserved GC spare, not general capacity.
    pub writable_bytes: usize,
    /// Bytes occupied by live entries.
    pub in_use_bytes: usize,
    /// Stale and corrupt bytes a garbage collection could reclaim.
    pub reclaimable_bytes: usize,
}

/// The key-value store over one flash partition.
///
/// Generic over the partition driver and the checksum algorithm protecting
/// entries. All state besides the entries themselves lives in RAM and is
/// rebuilt by [`mount`](KvStore::mount), which must complete before other
/// operations are usable.
///
/// The store is not internally synchronized: mutations take `&mut self`,
/// so the borrow checker enforces the single-writer model, and shared
/// borrows make reads against an unchanging store freely reentrant.
pub struct KvStore<F: FlashPartition, C: ChecksumAlgorithm> {
    pub(crate) partition: F,
    pub(crate) checksum: C,
    pub(crate) formats: EntryFormats,
    pub(crate) options: Options,
    pub(crate) cache: EntryCache,
    pub(crate) sectors: Vec<SectorDescriptor>,

    /// Ring position of the last sector handed out as a fresh (empty)
    /// allocation. Searches start one past it so consecutive allocations
    /// rotate across the partition instead of re-wearing low sectors.
    pub(crate) last_new_sector: usize,

    /// Monotonic id stamped into every entry. Burned on every entry
    /// materialization, successful or not, so a failed write can never
    /// alias a later one.
    pub(crate) last_transaction_id: u32,

    pub(crate) mounted: bool,
}

impl<F: FlashPartition, C: ChecksumAlgorithm> std::fmt::Debug for KvStore<F, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("mounted", &self.mounted)
            .field("sector_count", &self.sectors.len())
            .field("sector_size", &self.partition.sector_size_bytes())
            .field("live_keys", &self.cache.present_entries())
            .field("descriptors", &self.cache.len())
            .field("redundancy", &self.cache.redundancy())
            .field("last_transaction_id", &self.last_transaction_id)
            .field("last_new_sector", &self.last_new_sector)
            .finish()
    }
}

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Creates an unmounted store over `partition`.
    ///
    /// `formats` lists the accepted entry magics, the first being the write
    /// format; pass a single [`entry::EntryFormat`] when there is no legacy
    /// image to support. Call [`mount`](KvStore::mount) before use.
    pub fn new(
        partition: F,
        checksum: C,
        formats: impl Into<EntryFormats>,
        options: Options,
    ) -> Self {
        assert!(options.redundancy >= 1, "redundancy must be at least 1");
        assert!(options.max_entries >= 1, "max_entries must be at least 1");
        let cache = EntryCache::new(options.max_entries, options.redundancy);
        Self {
            partition,
            checksum,
            formats: formats.into(),
            options,
            cache,
            sectors: Vec::new(),
            last_new_sector: 0,
            last_transaction_id: 0,
            mounted: false,
        }
    }

    /// Whether [`mount`](KvStore::mount) has completed.
    #[must_use]
    pub fn mounted(&self) -> bool {
        self.mounted
    }

    /// Number of live (non-deleted) keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.present_entries()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entry materializations since the partition was last blank.
    /// Survives remounts; reset only by erasing the flash.
    #[must_use]
    pub fn transaction_count(&self) -> u32 {
        self.last_transaction_id
    }

    /// Configured copies per entry.
    #[must_use]
    pub fn redundancy(&self) -> usize {
        self.cache.redundancy()
    }

    /// Partition space accounting.
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        let sector_size = self.partition.sector_size_bytes();
        let mut stats = StorageStats::default();
        let mut spare_seen = false;

        for sector in &self.sectors {
            stats.in_use_bytes += sector.valid_bytes();
            stats.reclaimable_bytes += sector.recoverable_bytes(sector_size);

            if !spare_seen && sector.is_empty(sector_size) {
                spare_seen = true;
                continue;
            }
            stats.writable_bytes += sector.writable_bytes();
        }
        stats
    }

    /// Drops all RAM state. The store must be mounted again before use; the
    /// flash contents are untouched.
    pub fn reset(&mut self) {
        self.mounted = false;
        self.cache.clear();
        self.sectors.clear();
        self.last_new_sector = 0;
        self.last_transaction_id = 0;
    }

    /// The partition driver, e.g. for host-side tooling that snapshots the
    /// image.
    #[must_use]
    pub fn partition(&self) -> &F {
        &self.partition
    }

    /// Unmounts the store and hands back the partition driver.
    pub fn into_partition(self) -> F {
        self.partition
    }

    // ---- shared internals ----

    pub(crate) fn sector_size(&self) -> usize {
        self.partition.sector_size_bytes()
    }

    pub(crate) fn sector_of(&self, address: Address) -> usize {
        address as usize / self.sector_size()
    }

    pub(crate) fn sector_base(&self, index: usize) -> Address {
        (index * self.sector_size()) as Address
    }

    pub(crate) fn address_in_sector(&self, index: usize, address: Address) -> bool {
        self.sector_of(address) == index
    }

    /// Where the next entry appended to this sector will start.
    pub(crate) fn next_writable_address(&self, index: usize) -> Address {
        self.sector_base(index)
            + (self.sector_size() - self.sectors[index].writable_bytes()) as Address
    }

    pub(crate) fn ensure_mounted(&self) -> Result<()> {
        if !self.mounted {
            return Err(Error::NotMounted);
        }
        Ok(())
    }

    pub(crate) fn check_operation(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key is empty"));
        }
        if key.len() > Entry::MAX_KEY_LENGTH {
            return Err(Error::InvalidArgument("key exceeds 63 bytes"));
        }
        self.ensure_mounted()
    }

    /// Finds the descriptor for `key`, confirming the stored key bytes
    /// match. An equal hash from a different key reports a collision.
    pub(crate) fn find_descriptor(&self, key: &[u8]) -> Result<usize> {
        let hash = cache::key_hash(key);
        let Some(index) = self.cache.find(hash) else {
            return Err(Error::NotFound);
        };

        let entry = Entry::read(&self.partition, self.cache.get(index).address(), &self.formats)?;
        let mut buf = [0u8; Entry::MAX_KEY_LENGTH];
        let stored = entry.read_key(&self.partition, &mut buf)?;
        if stored == key {
            Ok(index)
        } else {
            log::warn!("key hash collision on {hash:#010x}: {stored:?} vs {key:?}");
            Err(Error::HashCollision)
        }
    }

    /// Like [`find_descriptor`](Self::find_descriptor), but a collision or
    /// a tombstoned key both read as absent.
    pub(crate) fn find_existing_descriptor(&self, key: &[u8]) -> Result<usize> {
        match self.find_descriptor(key) {
            Ok(index) if self.cache.get(index).deleted() => Err(Error::NotFound),
            Err(Error::HashCollision) => Err(Error::NotFound),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests;
