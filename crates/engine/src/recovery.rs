//! Mount-time recovery: the full-partition scan that rebuilds the
//! descriptor cache and sector accounting from nothing but the entries on
//! flash.
//!
//! Two passes. The first walks every sector entry-by-entry, merging each
//! parsed entry into the cache and marking the unwritten tail of each
//! sector writable; corrupt spans are skipped by scanning forward for the
//! next entry magic, and any sector containing corruption is locked
//! (writable forced to zero) so nothing lands there before GC reclaims it.
//! The second pass re-reads every cached address to credit its padded size
//! to the owning sector's valid bytes and to seed the transaction counter
//! and wear-leveling pointer from the newest entry.

use cache::{EntryState, KeyDescriptor, SectorDescriptor};
use entry::{ChecksumAlgorithm, Entry, EntryError};
use flash::{Address, FlashError, FlashPartition};
use log::{debug, info, warn};

use crate::{Error, ErrorRecovery, KvStore, Result};

/// What mount found on flash.
///
/// Corruption does not fail the mount: the store stays usable with every
/// key that survived, and the damaged spans are accounted as reclaimable.
/// Callers that need to distinguish a clean mount check
/// [`data_loss`](MountReport::data_loss).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountReport {
    /// Entries that failed to parse or verify.
    pub corrupt_entries: usize,
    /// Bytes written off as corrupt (including spans of unknown length
    /// after an unparseable entry).
    pub corrupt_bytes: usize,
}

impl MountReport {
    /// True if any corruption was found; some keys may be missing.
    #[must_use]
    pub fn data_loss(&self) -> bool {
        self.corrupt_entries > 0 || self.corrupt_bytes > 0
    }
}

/// Outcome of attempting to load one entry during the scan.
enum Scanned {
    /// A verified entry; the next entry would start at this address.
    Entry { next: Address },
    /// Erased flash: the rest of the sector is unwritten.
    Erased,
    /// Unparseable or failed verification.
    Corrupt,
}

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Scans the partition and rebuilds all RAM state.
    ///
    /// Always safe to call; any previous state is dropped first. On return
    /// the store is mounted even if the report records corruption. Errors
    /// mean the store is *not* usable: a flash driver failure, a descriptor
    /// table too small for the keys on flash (`NoSpace`), or an
    /// unmaintainable spare sector (`Internal`).
    pub fn mount(&mut self) -> Result<MountReport> {
        self.reset();

        let sector_size = self.partition.sector_size_bytes();
        let sector_count = self.partition.sector_count();
        self.sectors = vec![SectorDescriptor::new(sector_size); sector_count];

        info!(
            "mounting: {} sectors of {} bytes, alignment {}",
            sector_count,
            sector_size,
            self.partition.alignment_bytes()
        );

        let mut report = MountReport::default();

        // Pass 1: parse every sector front to back.
        for index in 0..sector_count {
            let base = self.sector_base(index);
            let mut address = base;
            let mut corrupt_bytes = 0usize;

            loop {
                if !self.address_in_sector(index, address) {
                    // Entries filled the sector exactly.
                    break;
                }
                match self.load_entry(address)? {
                    Scanned::Entry { next } => {
                        self.sectors[index]
                            .set_writable_bytes(sector_size.saturating_sub((next - base) as usize));
                        address = next;
                    }
                    Scanned::Erased => break,
                    Scanned::Corrupt => {
                        report.corrupt_entries += 1;
                        let resume = address + Entry::MIN_ALIGNMENT_BYTES as Address;
                        match self.scan_for_entry(index, resume)? {
                            Some(next) => {
                                // The corrupt entry's real size is unknowable;
                                // everything up to the next magic is written off.
                                corrupt_bytes += (next - address) as usize;
                                address = next;
                            }
                            None => {
                                corrupt_bytes += sector_size - (address - base) as usize;
                                break;
                            }
                        }
                    }
                }
            }

            if corrupt_bytes > 0 {
                // Lock the sector: no further appends land here, which also
                // makes it a prime GC candidate. Its intact keys stay
                // readable.
                self.sectors[index].set_writable_bytes(0);
                report.corrupt_bytes += corrupt_bytes;
                warn!("sector {index} contains {corrupt_bytes} corrupt bytes; locked");
            }
        }

        // Pass 2: credit each cached copy to its sector and find the newest
        // entry.
        let mut newest: Option<(u32, Address)> = None;
        for descriptor in self.cache.descriptors() {
            for &address in descriptor.addresses() {
                let entry = Entry::read(&self.partition, address, &self.formats)?;
                let sector = address as usize / sector_size;
                self.sectors[sector].add_valid_bytes(entry.size());
            }
            if newest.map_or(true, |(txn, _)| descriptor.transaction_id() > txn) {
                newest = Some((
                    descriptor.transaction_id(),
                    *descriptor.addresses().last().expect("descriptor has an address"),
                ));
            }
        }

        if let Some((transaction_id, address)) = newest {
            self.last_transaction_id = transaction_id;
            self.last_new_sector = self.sector_of(address);
        }

        // The collector needs a fully erased sector to relocate into; if the
        // log was interrupted mid-GC none may exist.
        let no_empty_sector = !self
            .sectors
            .iter()
            .any(|s| s.is_empty(sector_size));
        if no_empty_sector {
            debug!("no spare sector after scan; collecting one");
            self.collect_one_sector()?;
            if !self.sectors.iter().any(|s| s.is_empty(sector_size)) {
                warn!("unable to restore the spare sector");
                return Err(Error::Internal("no spare sector could be freed"));
            }
        }

        self.mounted = true;

        if report.data_loss() && self.options.recovery == ErrorRecovery::Immediate {
            debug!("immediate recovery: scrubbing locked sectors");
            self.garbage_collect_full()?;
        }

        info!(
            "mount complete: {} live keys, {} tombstoned, transaction id {}",
            self.len(),
            self.cache.len() - self.len(),
            self.last_transaction_id
        );
        if report.data_loss() {
            warn!(
                "mounted with data loss: {} corrupt entries, {} corrupt bytes",
                report.corrupt_entries, report.corrupt_bytes
            );
        }
        Ok(report)
    }

    /// Parses, verifies, and caches the entry at `address`.
    ///
    /// Only driver failures and a full descriptor table are hard errors;
    /// everything wrong with the bytes themselves classifies the location
    /// as [`Scanned::Corrupt`] so the scan can continue.
    fn load_entry(&mut self, address: Address) -> Result<Scanned> {
        let entry = match Entry::read(&self.partition, address, &self.formats) {
            Ok(entry) => entry,
            Err(EntryError::Erased) => return Ok(Scanned::Erased),
            Err(e) => return Self::classify_scan_failure(e),
        };

        let mut key_buf = [0u8; Entry::MAX_KEY_LENGTH];
        let key = match entry.read_key(&self.partition, &mut key_buf) {
            Ok(key) => key,
            Err(e) => return Self::classify_scan_failure(e),
        };

        if let Err(e) = entry.verify_in_flash(&self.partition, &mut self.checksum) {
            debug!("entry at {address:#x} failed verification: {e}");
            return Self::classify_scan_failure(e);
        }

        let state = if entry.deleted() {
            EntryState::Deleted
        } else {
            EntryState::Valid
        };
        let descriptor =
            KeyDescriptor::new(cache::key_hash(key), entry.transaction_id(), state, address);

        match self
            .cache
            .add_or_merge(descriptor, self.partition.sector_size_bytes())
        {
            Ok(()) => Ok(Scanned::Entry {
                next: entry.next_address(),
            }),
            // A full table means the partition holds more keys than this
            // store was configured for; that aborts the mount.
            Err(cache::CacheError::Full) => Err(Error::NoSpace),
            // Inconsistent duplicates (copies sharing a sector, copies past
            // the redundancy level) are treated like any other corruption.
            Err(e) => {
                warn!("entry at {address:#x} is inconsistent: {e}");
                Ok(Scanned::Corrupt)
            }
        }
    }

    /// Scans forward within a sector for the next plausible entry start,
    /// checking each minimum-alignment boundary for an accepted magic.
    fn scan_for_entry(&self, sector: usize, start: Address) -> Result<Option<Address>> {
        debug!("scanning sector {sector} for an entry magic from {start:#x}");

        let step = Entry::MIN_ALIGNMENT_BYTES;
        let mut address = (flash::align_up(start as usize, step)) as Address;
        while self.address_in_sector(sector, address) {
            let mut magic = [0u8; 4];
            self.partition.read(address, &mut magic)?;
            if self.formats.contains(u32::from_le_bytes(magic)) {
                return Ok(Some(address));
            }
            address += step as Address;
        }
        Ok(None)
    }

    /// Driver failures abort the scan; anything else is a corrupt location.
    fn classify_scan_failure(e: EntryError) -> Result<Scanned> {
        match e {
            // Reads that ran off the partition mean a nonsense size field,
            // not a broken driver.
            EntryError::Flash(FlashError::OutOfBounds { .. }) => Ok(Scanned::Corrupt),
            EntryError::Flash(e) => Err(Error::Flash(e)),
            _ => Ok(Scanned::Corrupt),
        }
    }
}
