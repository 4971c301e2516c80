//! Read path: `get()`, offset reads, and `value_size()`.

use entry::{ChecksumAlgorithm, Entry};
use flash::FlashPartition;

use crate::{Error, KvStore, Result};

impl<F: FlashPartition, C: ChecksumAlgorithm + Clone> KvStore<F, C> {
    /// Reads the whole value for `key` into `buffer`, returning the byte
    /// count.
    ///
    /// If the buffer is smaller than the value, as many bytes as fit are
    /// copied and [`Error::BufferTooSmall`] reports both the copied count
    /// and the full size; the remainder can be fetched with
    /// [`get_at`](KvStore::get_at).
    pub fn get(&self, key: &[u8], buffer: &mut [u8]) -> Result<usize> {
        self.get_at(key, buffer, 0)
    }

    /// Reads the value for `key` starting at `offset` bytes in.
    ///
    /// Checksum verification (when enabled) only runs for reads that cover
    /// the whole value from offset 0; a partial read returns unverified
    /// bytes.
    pub fn get_at(&self, key: &[u8], buffer: &mut [u8], offset: usize) -> Result<usize> {
        self.check_operation(key)?;
        let index = self.find_existing_descriptor(key)?;
        self.read_value_of(index, key, buffer, offset)
    }

    /// Size of the value stored under `key`, without reading it out.
    pub fn value_size(&self, key: &[u8]) -> Result<usize> {
        self.check_operation(key)?;
        let index = self.find_existing_descriptor(key)?;
        let descriptor = self.cache.get(index);
        let entry = Entry::read(&self.partition, descriptor.address(), &self.formats)?;
        Ok(entry.value_size())
    }

    /// Shared by `get_at` and iterator items: reads from the descriptor's
    /// primary copy and applies verify-on-read.
    pub(crate) fn read_value_of(
        &self,
        index: usize,
        key: &[u8],
        buffer: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let descriptor = self.cache.get(index);
        let entry = Entry::read(&self.partition, descriptor.address(), &self.formats)?;

        let value_size = entry.value_size();
        let copied = entry.read_value(&self.partition, buffer, offset)?;

        if self.options.verify_on_read && offset == 0 && copied == value_size {
            let mut checksum = self.checksum.clone();
            if entry.verify(&mut checksum, key, &buffer[..copied]).is_err() {
                // Do not hand corrupt bytes to the caller.
                buffer[..copied].fill(0);
                return Err(Error::Corrupt("entry checksum mismatch"));
            }
        }

        if copied < value_size - offset {
            return Err(Error::BufferTooSmall { copied, value_size });
        }
        Ok(copied)
    }
}
