//! Destination-sector selection.
//!
//! The allocator picks where the next entry lands, balancing three needs:
//! fill partially used sectors before opening fresh ones, rotate fresh
//! allocations around the partition for wear-leveling, and never hand out
//! the last empty sector (outside GC), so the collector always has a spare
//! to relocate into.

use entry::ChecksumAlgorithm;
use flash::FlashPartition;
use log::debug;

use crate::{Error, KvStore, Result};

/// What the requested space is for. During garbage collection the spare
/// sector may itself be consumed (the round is about to produce a new one),
/// but sectors with reclaimable bytes are off limits as destinations: moving
/// entries into them would just schedule another relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocMode {
    Append,
    GarbageCollect,
}

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Picks a sector with `size` writable bytes, skipping the sectors in
    /// `skip` (already reserved, or holding another copy of the same key).
    ///
    /// The ring walk starts one past `last_new_sector`. Two tiers:
    ///
    /// 1. The first partially used sector with room (in GC mode, only one
    ///    with no reclaimable bytes) wins immediately.
    /// 2. Otherwise the first empty sector seen wins, provided a second
    ///    empty sector exists to remain as the spare. GC mode waives the
    ///    second-empty requirement.
    pub(crate) fn find_sector_with_space(
        &mut self,
        size: usize,
        mode: AllocMode,
        skip: &[usize],
    ) -> Result<usize> {
        let sector_size = self.sector_size();
        let count = self.sectors.len();

        let mut first_empty: Option<usize> = None;
        let mut spare_covered = mode == AllocMode::GarbageCollect;

        let mut index = self.last_new_sector;
        for _ in 0..count {
            index = (index + 1) % count;
            if skip.contains(&index) {
                continue;
            }

            let sector = &self.sectors[index];
            if !sector.is_empty(sector_size)
                && sector.has_space(size)
                && (mode == AllocMode::Append || sector.recoverable_bytes(sector_size) == 0)
            {
                return Ok(index);
            }

            if sector.is_empty(sector_size) {
                if first_empty.is_none() {
                    first_empty = Some(index);
                } else {
                    spare_covered = true;
                }
            }
        }

        match first_empty {
            Some(index) if spare_covered => {
                debug!("opening empty sector {index}");
                self.last_new_sector = index;
                Ok(index)
            }
            _ => Err(Error::NoSpace),
        }
    }

    /// Reserves one destination sector per redundant copy, all distinct.
    pub(crate) fn reserve_sectors(&mut self, size: usize) -> Result<Vec<usize>> {
        let redundancy = self.cache.redundancy();
        let mut reserved = Vec::with_capacity(redundancy);
        for _ in 0..redundancy {
            let sector = self.find_sector_with_space(size, AllocMode::Append, &reserved)?;
            reserved.push(sector);
        }
        Ok(reserved)
    }
}
