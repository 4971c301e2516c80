//! Write path: `put()`, `delete()`, and the shared append machinery.
//!
//! Every mutation materializes a fresh entry at the tail of some sector;
//! nothing on flash is ever modified in place. A `delete` is a `put` of a
//! tombstone. The previous generation's bytes simply stop being counted as
//! valid, to be reclaimed when GC erases their sector.

use cache::{EntryState, KeyDescriptor};
use entry::{ChecksumAlgorithm, Entry};
use flash::{Address, FlashPartition};
use log::{debug, warn};

use crate::{Error, GcOnWrite, KvStore, Result};

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Stores `value` under `key`, overwriting any existing value.
    ///
    /// If no sector can fit the entry and `gc_on_write` allows it, garbage
    /// collection runs and the write retries. Keys must be 1..=63 bytes;
    /// the whole entry (header + key + value + padding) must fit in one
    /// sector.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_operation(key)?;

        if value.len() > Entry::MAX_VALUE_SIZE {
            return Err(Error::InvalidArgument("value exceeds the maximum size"));
        }
        let size = Entry::padded_size(key.len(), value.len(), self.partition.alignment_bytes());
        if size > self.sector_size() {
            debug!(
                "{}B key with {}B value cannot fit in a {}B sector",
                key.len(),
                value.len(),
                self.sector_size()
            );
            return Err(Error::InvalidArgument("entry does not fit in one sector"));
        }

        match self.find_descriptor(key) {
            Ok(index) => self.write_existing(index, EntryState::Valid, key, value),
            Err(Error::NotFound) => self.write_new(key, value),
            Err(e) => Err(e),
        }
    }

    /// Removes `key` by appending a tombstone for it.
    ///
    /// The tombstone outlives the removal so a remount does not resurrect
    /// older generations of the key; its descriptor slot stays occupied.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_operation(key)?;

        let index = self.find_existing_descriptor(key)?;
        debug!(
            "tombstoning key {:#010x} ({} copies)",
            self.cache.get(index).hash(),
            self.cache.get(index).addresses().len()
        );
        self.write_existing(index, EntryState::Deleted, key, &[])
    }

    /// Appends a new generation for a key that already has a descriptor and
    /// retires the old generation's bytes.
    fn write_existing(
        &mut self,
        index: usize,
        state: EntryState,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let size = Entry::padded_size(key.len(), value.len(), self.partition.alignment_bytes());
        let sectors = self.reserve_for_write(size)?;

        // The old copies are captured only after the reservation: a GC
        // triggered by it may have just relocated this very key.
        let old_addresses: Vec<Address> = self.cache.get(index).addresses().to_vec();
        let old_entry = Entry::read(&self.partition, old_addresses[0], &self.formats)?;
        let old_size = old_entry.size();

        let (transaction_id, addresses) = self.write_reserved(&sectors, key, value, state, size)?;
        self.cache
            .get_mut(index)
            .update(transaction_id, state, addresses);

        // Only now, with the new generation fully committed, do the old
        // copies stop counting as valid. A crash in between leaves both
        // generations on flash; the transaction id picks the winner at
        // remount.
        for &address in &old_addresses {
            let sector = self.sector_of(address);
            self.sectors[sector].remove_valid_bytes(old_size);
        }
        Ok(())
    }

    /// First-ever write of a key: claims a descriptor slot.
    fn write_new(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.cache.len() == self.cache.max_entries() {
            warn!(
                "descriptor table full ({} entries); cannot store a new key",
                self.cache.len()
            );
            return Err(Error::NoSpace);
        }

        let size = Entry::padded_size(key.len(), value.len(), self.partition.alignment_bytes());
        let sectors = self.reserve_for_write(size)?;
        let (transaction_id, addresses) =
            self.write_reserved(&sectors, key, value, EntryState::Valid, size)?;
        let hash = cache::key_hash(key);
        let index = self
            .cache
            .insert(KeyDescriptor::new(hash, transaction_id, EntryState::Valid, addresses[0]))?;
        self.cache
            .get_mut(index)
            .update(transaction_id, EntryState::Valid, addresses);
        Ok(())
    }

    /// Reserves one destination sector per copy, collecting garbage per
    /// policy if the first attempt finds no space. All sectors are settled
    /// before any id is burned or byte written, so a GC can never
    /// interleave with the copies themselves.
    fn reserve_for_write(&mut self, size: usize) -> Result<Vec<usize>> {
        match self.reserve_sectors(size) {
            Ok(sectors) => Ok(sectors),
            Err(Error::NoSpace) => self.reserve_after_gc(size),
            Err(e) => Err(e),
        }
    }

    /// Writes one logical generation into the reserved sectors: burns a
    /// transaction id, then appends one copy per sector.
    fn write_reserved(
        &mut self,
        sectors: &[usize],
        key: &[u8],
        value: &[u8],
        state: EntryState,
        size: usize,
    ) -> Result<(u32, Vec<Address>)> {
        // Burn the id before touching flash: even if every copy fails, this
        // id is spent. A later retry gets a fresh id, so a half-written
        // entry from the failure can never alias a successful one.
        self.last_transaction_id += 1;
        let transaction_id = self.last_transaction_id;

        let mut addresses = Vec::with_capacity(sectors.len());
        for &sector in sectors {
            match self.append_entry(sector, key, value, state, transaction_id) {
                Ok(address) => addresses.push(address),
                Err(e) => {
                    // Copies already written this round are garbage now.
                    for &address in &addresses {
                        let s = self.sector_of(address);
                        self.sectors[s].remove_valid_bytes(size);
                    }
                    return Err(e);
                }
            }
        }
        Ok((transaction_id, addresses))
    }

    /// Space-starved write: collect garbage per policy, then re-reserve.
    fn reserve_after_gc(&mut self, size: usize) -> Result<Vec<usize>> {
        match self.options.gc_on_write {
            GcOnWrite::Disabled => Err(Error::NoSpace),
            GcOnWrite::OneSector => {
                debug!("write is space-starved; collecting one sector");
                self.collect_one_sector()?;
                self.reserve_sectors(size)
            }
            GcOnWrite::AsNeeded => {
                // Each round erases at most one sector, so the sector count
                // bounds useful rounds.
                for _ in 0..self.sectors.len() {
                    let sector_size = self.sector_size();
                    let reclaimable: usize = self
                        .sectors
                        .iter()
                        .map(|s| s.recoverable_bytes(sector_size))
                        .sum();
                    if reclaimable == 0 {
                        return Err(Error::NoSpace);
                    }
                    debug!("write is space-starved; collecting ({reclaimable}B reclaimable)");
                    self.collect_one_sector()?;
                    match self.reserve_sectors(size) {
                        Ok(sectors) => return Ok(sectors),
                        Err(Error::NoSpace) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::NoSpace)
            }
        }
    }

    /// Appends one entry at the tail of `sector` and settles the sector's
    /// accounting, returning the entry's address.
    pub(crate) fn append_entry(
        &mut self,
        sector: usize,
        key: &[u8],
        value: &[u8],
        state: EntryState,
        transaction_id: u32,
    ) -> Result<Address> {
        let address = self.next_writable_address(sector);
        let alignment = Entry::alignment_for(self.partition.alignment_bytes());
        let format = self.formats.primary();
        let mut entry = match state {
            EntryState::Valid => {
                Entry::valid(address, format, key, value.len(), transaction_id, alignment)
            }
            EntryState::Deleted => {
                Entry::tombstone(address, format, key, transaction_id, alignment)
            }
        };

        debug!(
            "appending {}B entry (txn {transaction_id}) at {address:#x}",
            entry.size()
        );

        let result = entry.write(&mut self.partition, &mut self.checksum, key, value);

        // Bytes the device committed are consumed, success or not.
        let written = match &result {
            Ok(n) => *n,
            Err(e) => e.bytes_written,
        };
        self.sectors[sector].remove_writable_bytes(written);

        if let Err(e) = result {
            warn!(
                "write of {}B at {address:#x} failed with {} bytes committed",
                entry.size(),
                e.bytes_written
            );
            return Err(Error::Flash(e.source));
        }

        if self.options.verify_on_write {
            entry.verify_in_flash(&self.partition, &mut self.checksum)?;
        }

        self.sectors[sector].add_valid_bytes(entry.size());
        Ok(address)
    }
}
