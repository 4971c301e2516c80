//! # Flash — partition contract and NOR simulator
//!
//! Defines the storage substrate the FlintKV engine runs on: a flash
//! partition divided into uniformly sized erase sectors, addressed by byte
//! offsets relative to the partition start.
//!
//! ## The NOR model
//!
//! - Erased flash reads as all-ones (`0xFF`). An erase operates on whole
//!   sectors and restores every byte in them to `0xFF`.
//! - A write can only clear bits (`1 -> 0`). Appending to previously erased
//!   space is always safe; overwriting live data is not, and the engine never
//!   does it.
//! - Writes must be aligned to [`FlashPartition::alignment_bytes`] in both
//!   start address and length. Reads are unrestricted.
//! - A write may be accepted only partially. The driver reports how many
//!   bytes it committed so the caller can keep its space accounting exact
//!   even on failure.
//!
//! ## Example
//!
//! ```rust
//! use flash::{FlashPartition, MemFlash};
//!
//! let mut dev = MemFlash::new(4, 4096, 16);
//! dev.write(0, &[0xAB; 16]).unwrap();
//!
//! let mut buf = [0u8; 16];
//! dev.read(0, &mut buf).unwrap();
//! assert_eq!(buf, [0xAB; 16]);
//!
//! dev.erase(0, 1).unwrap();
//! dev.read(0, &mut buf).unwrap();
//! assert_eq!(buf, [0xFF; 16]);
//! ```

use thiserror::Error;

/// Byte offset relative to the start of the partition.
pub type Address = u32;

/// Value of an erased NOR flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be nonzero.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    ((value + alignment - 1) / alignment) * alignment
}

/// Errors reported by a flash driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    /// The access touches bytes outside the partition.
    #[error("access at {address:#x} for {len} bytes is out of bounds")]
    OutOfBounds { address: Address, len: usize },

    /// A write's address or length is not a multiple of the write alignment.
    #[error("write at {address:#x} for {len} bytes violates {alignment}-byte alignment")]
    Misaligned {
        address: Address,
        len: usize,
        alignment: usize,
    },

    /// An erase base address is not a sector boundary.
    #[error("erase base {address:#x} is not sector-aligned")]
    UnalignedErase { address: Address },

    /// The device failed to read.
    #[error("flash read failed at {address:#x}")]
    ReadFault { address: Address },

    /// The device failed mid-write.
    #[error("flash write failed at {address:#x}")]
    WriteFault { address: Address },

    /// The device failed to erase.
    #[error("flash erase failed at {address:#x}")]
    EraseFault { address: Address },
}

/// A failed write, carrying how many bytes the device committed before the
/// failure. Committed bytes are unrecoverable; callers must account for them
/// as consumed space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{source} ({bytes_written} bytes committed)")]
pub struct WriteError {
    pub bytes_written: usize,
    pub source: FlashError,
}

/// Contract between the key-value engine and a flash partition driver.
///
/// Addresses are absolute within the partition. Implementations are expected
/// to be synchronous; any internal retries or deadlines are the driver's
/// concern.
pub trait FlashPartition {
    /// Number of erase sectors in the partition.
    fn sector_count(&self) -> usize;

    /// Size of one erase sector in bytes.
    fn sector_size_bytes(&self) -> usize;

    /// Required write alignment in bytes.
    fn alignment_bytes(&self) -> usize;

    /// Total partition size in bytes.
    fn size_bytes(&self) -> usize {
        self.sector_count() * self.sector_size_bytes()
    }

    /// Reads `buf.len()` bytes starting at `address`.
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Writes `data` starting at `address`, which must satisfy the write
    /// alignment. On success all bytes were committed. On failure the error
    /// reports how many leading bytes the device committed anyway.
    fn write(&mut self, address: Address, data: &[u8]) -> Result<usize, WriteError>;

    /// Erases `sector_count` whole sectors starting at the sector-aligned
    /// `base` address, restoring them to `0xFF`.
    fn erase(&mut self, base: Address, sector_count: usize) -> Result<(), FlashError>;
}

/// In-memory NOR flash used by tests, benches, and the CLI image loader.
///
/// Faithfully models the properties the engine relies on: erased bytes read
/// `0xFF`, writes AND into the array (bits can only be cleared), and writes
/// enforce the configured alignment. A one-shot fault can be armed to accept
/// a limited number of bytes and then fail, for partial-write tests.
#[derive(Debug, Clone)]
pub struct MemFlash {
    data: Vec<u8>,
    sector_size: usize,
    alignment: usize,
    /// One-shot fault: the first write longer than this commits only the
    /// aligned prefix, then fails with `WriteFault`.
    write_cap: Option<usize>,
}

impl MemFlash {
    /// Creates an erased partition of `sector_count` sectors of
    /// `sector_size` bytes with the given write alignment.
    pub fn new(sector_count: usize, sector_size: usize, alignment: usize) -> Self {
        assert!(sector_count > 0 && sector_size > 0);
        assert!(alignment > 0 && sector_size % alignment == 0);
        Self {
            data: vec![ERASED_BYTE; sector_count * sector_size],
            sector_size,
            alignment,
            write_cap: None,
        }
    }

    /// Builds a partition from an existing image. The image length must be a
    /// whole number of sectors.
    pub fn from_image(image: Vec<u8>, sector_size: usize, alignment: usize) -> Self {
        assert!(sector_size > 0 && !image.is_empty());
        assert!(image.len() % sector_size == 0, "image is not whole sectors");
        assert!(alignment > 0 && sector_size % alignment == 0);
        Self {
            data: image,
            sector_size,
            alignment,
            write_cap: None,
        }
    }

    /// Raw image contents.
    pub fn image(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw image contents, for seeding and corruption tests.
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Arms a one-shot fault: the first write longer than `bytes` commits
    /// only its aligned prefix and reports `WriteFault`.
    pub fn fail_next_write_after(&mut self, bytes: usize) {
        self.write_cap = Some(bytes);
    }

    fn check_bounds(&self, address: Address, len: usize) -> Result<(), FlashError> {
        let end = address as usize + len;
        if end > self.data.len() {
            return Err(FlashError::OutOfBounds { address, len });
        }
        Ok(())
    }
}

impl FlashPartition for MemFlash {
    fn sector_count(&self) -> usize {
        self.data.len() / self.sector_size
    }

    fn sector_size_bytes(&self) -> usize {
        self.sector_size
    }

    fn alignment_bytes(&self) -> usize {
        self.alignment
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_bounds(address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<usize, WriteError> {
        let misaligned = address as usize % self.alignment != 0 || data.len() % self.alignment != 0;
        if misaligned {
            return Err(WriteError {
                bytes_written: 0,
                source: FlashError::Misaligned {
                    address,
                    len: data.len(),
                    alignment: self.alignment,
                },
            });
        }
        if let Err(e) = self.check_bounds(address, data.len()) {
            return Err(WriteError {
                bytes_written: 0,
                source: e,
            });
        }

        let accept = match self.write_cap {
            // Committed bytes stay aligned so the device never exposes a
            // torn write unit.
            Some(cap) if cap < data.len() => {
                self.write_cap = None;
                Some(cap / self.alignment * self.alignment)
            }
            _ => None,
        };

        let len = accept.unwrap_or(data.len());
        let start = address as usize;
        // NOR cells only clear bits.
        for (cell, byte) in self.data[start..start + len].iter_mut().zip(data) {
            *cell &= *byte;
        }

        match accept {
            None => Ok(data.len()),
            Some(bytes_written) => Err(WriteError {
                bytes_written,
                source: FlashError::WriteFault {
                    address: address + bytes_written as Address,
                },
            }),
        }
    }

    fn erase(&mut self, base: Address, sector_count: usize) -> Result<(), FlashError> {
        if base as usize % self.sector_size != 0 {
            return Err(FlashError::UnalignedErase { address: base });
        }
        let len = sector_count * self.sector_size;
        self.check_bounds(base, len)?;
        let start = base as usize;
        self.data[start..start + len].fill(ERASED_BYTE);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
