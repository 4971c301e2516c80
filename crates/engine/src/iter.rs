//! Iteration over live items.
//!
//! [`KvStore::iter`] walks the descriptor table, skipping tombstones, and
//! yields one [`Item`] per live key. Keys are read from flash as the
//! iterator advances; values are only read when an item is asked for one.
//! The iterator shares the store borrow, so the compiler already rules out
//! mutation while iterating.

use entry::{ChecksumAlgorithm, Entry};
use flash::FlashPartition;

use crate::{KvStore, Result};

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Iterates over live (non-deleted) items in descriptor-table order.
    pub fn iter(&self) -> Entries<'_, F, C> {
        Entries {
            store: self,
            index: 0,
        }
    }
}

/// Lazy iterator over a store's live items.
pub struct Entries<'a, F: FlashPartition, C: ChecksumAlgorithm> {
    store: &'a KvStore<F, C>,
    index: usize,
}

impl<'a, F: FlashPartition, C: ChecksumAlgorithm + Clone> Iterator for Entries<'a, F, C> {
    type Item = Item<'a, F, C>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.store.cache.len() {
            let index = self.index;
            self.index += 1;

            let descriptor = self.store.cache.get(index);
            if descriptor.deleted() {
                continue;
            }

            // An unreadable key here means the flash changed under a live
            // descriptor; skip the item rather than yield garbage.
            let Ok(entry) =
                Entry::read(&self.store.partition, descriptor.address(), &self.store.formats)
            else {
                continue;
            };
            let mut buf = [0u8; Entry::MAX_KEY_LENGTH];
            let Ok(key) = entry.read_key(&self.store.partition, &mut buf) else {
                continue;
            };

            return Some(Item {
                store: self.store,
                index,
                key: key.to_vec(),
            });
        }
        None
    }
}

/// One live key-value pair. The key was read during iteration; the value
/// stays on flash until requested.
pub struct Item<'a, F: FlashPartition, C: ChecksumAlgorithm> {
    store: &'a KvStore<F, C>,
    index: usize,
    key: Vec<u8>,
}

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> Item<'_, F, C> {
    /// The item's key: raw bytes, not NUL-terminated.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Reads this item's value, with the same semantics as
    /// [`KvStore::get`].
    pub fn value(&self, buffer: &mut [u8]) -> Result<usize> {
        self.store.read_value_of(self.index, &self.key, buffer, 0)
    }

    /// Size of this item's value.
    pub fn value_size(&self) -> Result<usize> {
        let descriptor = self.store.cache.get(self.index);
        let entry = Entry::read(
            &self.store.partition,
            descriptor.address(),
            &self.store.formats,
        )?;
        Ok(entry.value_size())
    }
}
