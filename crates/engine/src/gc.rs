//! Garbage collection: reclaiming sectors whose bytes are mostly stale or
//! corrupt.
//!
//! A round picks the victim with the most recoverable bytes (preferring one
//! with nothing live in it, which needs no relocations), moves every live
//! entry out, and erases it. Relocated entries are appended through the
//! normal write path under a fresh transaction id, so a crash mid-round
//! leaves either the old copy, the new copy, or both; the id disambiguates
//! at the next mount.

use entry::{ChecksumAlgorithm, Entry};
use flash::{Address, FlashPartition};
use log::{debug, warn};

use crate::alloc::AllocMode;
use crate::{Error, KvStore, Result};

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Collects a single sector: the one with the most reclaimable bytes.
    /// A no-op when nothing is reclaimable.
    pub fn garbage_collect_partial(&mut self) -> Result<()> {
        self.ensure_mounted()?;
        self.collect_one_sector()
    }

    /// Collects every sector with reclaimable bytes, walking the ring from
    /// the wear-leveling pointer.
    pub fn garbage_collect_full(&mut self) -> Result<()> {
        self.ensure_mounted()?;
        debug!("full garbage collection");

        let count = self.sectors.len();
        let mut index = self.last_new_sector;
        for _ in 0..count {
            index = (index + 1) % count;
            if self.sectors[index].recoverable_bytes(self.sector_size()) > 0 {
                self.collect_sector(index)?;
            }
        }
        Ok(())
    }

    /// One GC round. Also used by mount (before the store is flagged
    /// mounted) to restore the spare sector.
    pub(crate) fn collect_one_sector(&mut self) -> Result<()> {
        let Some(victim) = self.find_sector_to_collect() else {
            return Ok(());
        };
        self.collect_sector(victim)
    }

    /// Victim choice: most recoverable bytes, with sectors holding nothing
    /// live taking priority since they can be erased without relocations.
    fn find_sector_to_collect(&self) -> Option<usize> {
        let sector_size = self.sector_size();

        let mut candidate = None;
        let mut candidate_bytes = 0;
        for (index, sector) in self.sectors.iter().enumerate() {
            if sector.valid_bytes() == 0 && sector.recoverable_bytes(sector_size) > candidate_bytes
            {
                candidate = Some(index);
                candidate_bytes = sector.recoverable_bytes(sector_size);
            }
        }
        if candidate.is_some() {
            return candidate;
        }

        for (index, sector) in self.sectors.iter().enumerate() {
            if sector.recoverable_bytes(sector_size) > candidate_bytes {
                candidate = Some(index);
                candidate_bytes = sector.recoverable_bytes(sector_size);
            }
        }
        candidate
    }

    /// Relocates everything live out of `victim`, then erases it.
    fn collect_sector(&mut self, victim: usize) -> Result<()> {
        debug!(
            "collecting sector {victim}: {} recoverable, {} valid bytes",
            self.sectors[victim].recoverable_bytes(self.sector_size()),
            self.sectors[victim].valid_bytes()
        );

        if self.sectors[victim].valid_bytes() != 0 {
            for index in 0..self.cache.len() {
                let copy_in_victim = self
                    .cache
                    .get(index)
                    .addresses()
                    .iter()
                    .copied()
                    .find(|&a| self.address_in_sector(victim, a));
                if let Some(address) = copy_in_victim {
                    self.relocate_entry(index, address)?;
                }
            }
        }

        if self.sectors[victim].valid_bytes() != 0 {
            warn!(
                "sector {victim} still holds {} valid bytes after relocation",
                self.sectors[victim].valid_bytes()
            );
            return Err(Error::Internal("valid entries remain in the GC victim"));
        }

        // Nothing may land in the victim between this point and the erase
        // completing; with the erase failed the sector stays locked and the
        // next mount re-derives the truth from flash.
        self.sectors[victim].set_writable_bytes(0);
        let base = self.sector_base(victim);
        if let Err(e) = self.partition.erase(base, 1) {
            warn!("erase of sector {victim} failed: {e}");
            return Err(Error::Internal("sector erase failed"));
        }
        let sector_size = self.sector_size();
        self.sectors[victim].set_writable_bytes(sector_size);

        debug!("sector {victim} collected");
        Ok(())
    }

    /// Moves the copy of descriptor `index` living at `address` into a
    /// sector outside the victim.
    ///
    /// The entry is re-read and re-verified before the move; relocating a
    /// rotten entry would launder corruption into a fresh checksum. The
    /// rewrite gets a fresh transaction id and the descriptor collapses to
    /// the single new copy, retiring any other copies of the old
    /// generation.
    fn relocate_entry(&mut self, index: usize, address: Address) -> Result<()> {
        let descriptor = self.cache.get(index);
        debug!(
            "relocating entry at {address:#x} for key {:#010x}",
            descriptor.hash()
        );

        let entry = Entry::read(&self.partition, address, &self.formats)?;

        let mut key_buf = [0u8; Entry::MAX_KEY_LENGTH];
        let key = entry.read_key(&self.partition, &mut key_buf)?;

        let mut value = vec![0u8; entry.value_size()];
        entry.read_value(&self.partition, &mut value, 0)?;
        if entry.verify(&mut self.checksum, key, &value).is_err() {
            return Err(Error::Internal("relocating entry failed verification"));
        }

        let old_sectors: Vec<usize> = descriptor
            .addresses()
            .iter()
            .map(|&a| self.sector_of(a))
            .collect();
        let state = descriptor.state();

        let destination =
            self.find_sector_with_space(entry.size(), AllocMode::GarbageCollect, &old_sectors)?;

        // Relocation is an entry materialization like any other: it burns an
        // id. The copies left behind become stale under the new id.
        self.last_transaction_id += 1;
        let transaction_id = self.last_transaction_id;

        let new_address = self.append_entry(destination, key, &value, state, transaction_id)?;
        self.cache
            .get_mut(index)
            .update(transaction_id, state, vec![new_address]);

        let size = entry.size();
        for sector in old_sectors {
            self.sectors[sector].remove_valid_bytes(size);
        }
        Ok(())
    }
}
