use byteorder::{ByteOrder, LittleEndian};
use flash::{align_up, Address, FlashPartition, WriteError, ERASED_BYTE};

use crate::{ChecksumAlgorithm, EntryError, EntryFormat, EntryFormats, ERASED_MAGIC};

/// Stack buffer large enough for any legal key.
pub type KeyBuffer = [u8; Entry::MAX_KEY_LENGTH];

/// The fixed-size entry header, exactly as stored on flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic: u32,
    pub checksum: u32,
    pub alignment_units: u8,
    pub key_length: u8,
    pub value_size_bytes: u16,
    pub transaction_id: u32,
}

impl EntryHeader {
    pub fn to_bytes(&self) -> [u8; Entry::HEADER_BYTES] {
        let mut buf = [0u8; Entry::HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.checksum);
        buf[8] = self.alignment_units;
        buf[9] = self.key_length;
        LittleEndian::write_u16(&mut buf[10..12], self.value_size_bytes);
        LittleEndian::write_u32(&mut buf[12..16], self.transaction_id);
        buf
    }

    pub fn from_bytes(buf: &[u8; Entry::HEADER_BYTES]) -> Self {
        Self {
            magic: LittleEndian::read_u32(&buf[0..4]),
            checksum: LittleEndian::read_u32(&buf[4..8]),
            alignment_units: buf[8],
            key_length: buf[9],
            value_size_bytes: LittleEndian::read_u16(&buf[10..12]),
            transaction_id: LittleEndian::read_u32(&buf[12..16]),
        }
    }
}

/// One entry on flash: its partition address plus the parsed header.
///
/// An `Entry` obtained from [`Entry::read`] has a plausible header, but its
/// key and value are untrusted until [`verify`](Entry::verify) or
/// [`verify_in_flash`](Entry::verify_in_flash) has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    address: Address,
    header: EntryHeader,
}

impl Entry {
    /// Header size; also the minimum alignment entries start at.
    pub const HEADER_BYTES: usize = 16;

    /// Entries begin at multiples of this, whatever their own alignment.
    pub const MIN_ALIGNMENT_BYTES: usize = 16;

    /// Keys are 1..=63 bytes (six significant bits of `key_length`).
    pub const MAX_KEY_LENGTH: usize = 0b11_1111;

    /// Largest storable value; `0xFFFF` itself is the tombstone sentinel.
    pub const MAX_VALUE_SIZE: usize = Self::TOMBSTONE_VALUE_LENGTH as usize - 1;

    const TOMBSTONE_VALUE_LENGTH: u16 = 0xFFFF;

    /// Creates an entry for a live key-value pair at `address`.
    pub fn valid(
        address: Address,
        format: EntryFormat,
        key: &[u8],
        value_len: usize,
        transaction_id: u32,
        alignment_bytes: usize,
    ) -> Self {
        debug_assert!(value_len <= Self::MAX_VALUE_SIZE);
        Self::new(
            address,
            format,
            key,
            value_len as u16,
            transaction_id,
            alignment_bytes,
        )
    }

    /// Creates a tombstone entry marking `key` as deleted.
    pub fn tombstone(
        address: Address,
        format: EntryFormat,
        key: &[u8],
        transaction_id: u32,
        alignment_bytes: usize,
    ) -> Self {
        Self::new(
            address,
            format,
            key,
            Self::TOMBSTONE_VALUE_LENGTH,
            transaction_id,
            alignment_bytes,
        )
    }

    fn new(
        address: Address,
        format: EntryFormat,
        key: &[u8],
        value_size_bytes: u16,
        transaction_id: u32,
        alignment_bytes: usize,
    ) -> Self {
        debug_assert!(!key.is_empty() && key.len() <= Self::MAX_KEY_LENGTH);
        debug_assert!(alignment_bytes % Self::MIN_ALIGNMENT_BYTES == 0);
        debug_assert!(alignment_bytes / 16 <= u8::MAX as usize + 1);
        Self {
            address,
            header: EntryHeader {
                magic: format.magic,
                // Filled in by write() once the value bytes are known.
                checksum: 0,
                alignment_units: (alignment_bytes / 16 - 1) as u8,
                key_length: key.len() as u8,
                value_size_bytes,
                transaction_id,
            },
        }
    }

    /// Parses the entry header at `address`.
    ///
    /// - [`EntryError::Erased`]: the location reads as erased flash.
    /// - [`EntryError::UnknownMagic`]: a magic matching no accepted format.
    /// - [`EntryError::Malformed`]: a field outside its legal range.
    pub fn read<F: FlashPartition>(
        flash: &F,
        address: Address,
        formats: &EntryFormats,
    ) -> Result<Self, EntryError> {
        let mut buf = [0u8; Self::HEADER_BYTES];
        flash.read(address, &mut buf)?;
        let header = EntryHeader::from_bytes(&buf);

        if header.magic == ERASED_MAGIC {
            return Err(EntryError::Erased);
        }
        if !formats.contains(header.magic) {
            return Err(EntryError::UnknownMagic {
                magic: header.magic,
            });
        }
        if header.key_length == 0 || header.key_length as usize > Self::MAX_KEY_LENGTH {
            return Err(EntryError::Malformed("key length out of range"));
        }
        Ok(Self { address, header })
    }

    /// Total on-flash size of an entry, padding included, for a key and value
    /// of the given lengths on a partition with the given write alignment.
    pub fn padded_size(key_len: usize, value_len: usize, partition_alignment: usize) -> usize {
        align_up(
            Self::HEADER_BYTES + key_len + value_len,
            partition_alignment.max(Self::MIN_ALIGNMENT_BYTES),
        )
    }

    /// The alignment entries created for this partition must use.
    pub fn alignment_for(partition_alignment: usize) -> usize {
        partition_alignment.max(Self::MIN_ALIGNMENT_BYTES)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Where the next entry could start.
    pub fn next_address(&self) -> Address {
        self.address + self.size() as Address
    }

    /// Total size of this entry on flash, padding included.
    pub fn size(&self) -> usize {
        align_up(self.content_size(), self.alignment_bytes())
    }

    fn content_size(&self) -> usize {
        Self::HEADER_BYTES + self.key_length() + self.value_size()
    }

    fn alignment_bytes(&self) -> usize {
        (self.header.alignment_units as usize + 1) * 16
    }

    pub fn magic(&self) -> u32 {
        self.header.magic
    }

    pub fn transaction_id(&self) -> u32 {
        self.header.transaction_id
    }

    pub fn key_length(&self) -> usize {
        self.header.key_length as usize
    }

    /// Value size in bytes; 0 for tombstones.
    pub fn value_size(&self) -> usize {
        if self.deleted() {
            0
        } else {
            self.header.value_size_bytes as usize
        }
    }

    /// Whether this entry marks its key as deleted.
    pub fn deleted(&self) -> bool {
        self.header.value_size_bytes == Self::TOMBSTONE_VALUE_LENGTH
    }

    /// Reads this entry's key from flash. Keys are raw bytes with no
    /// encoding constraint.
    pub fn read_key<'b, F: FlashPartition>(
        &self,
        flash: &F,
        buf: &'b mut KeyBuffer,
    ) -> Result<&'b [u8], EntryError> {
        let len = self.key_length();
        flash.read(self.key_address(), &mut buf[..len])?;
        Ok(&buf[..len])
    }

    /// Reads value bytes starting at `offset` into `buf`, returning the
    /// number of bytes copied: the smaller of the buffer size and the value
    /// bytes remaining past the offset.
    pub fn read_value<F: FlashPartition>(
        &self,
        flash: &F,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize, EntryError> {
        let value_size = self.value_size();
        if offset > value_size {
            return Err(EntryError::OffsetOutOfRange { offset, value_size });
        }
        let len = buf.len().min(value_size - offset);
        flash.read(self.value_address() + offset as Address, &mut buf[..len])?;
        Ok(len)
    }

    /// Serializes the entry (computing its checksum) and appends it to flash
    /// at the entry's address. Padding is written as `0xFF`, leaving those
    /// cells erased.
    ///
    /// Returns the total bytes committed. On failure the error still reports
    /// the committed byte count so the caller can account for the consumed
    /// space.
    pub fn write<F: FlashPartition, C: ChecksumAlgorithm>(
        &mut self,
        flash: &mut F,
        checksum: &mut C,
        key: &[u8],
        value: &[u8],
    ) -> Result<usize, WriteError> {
        debug_assert_eq!(key.len(), self.key_length());
        debug_assert_eq!(value.len(), self.value_size());

        self.header.checksum = self.compute_checksum(checksum, key, value);

        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(value);
        bytes.resize(self.size(), ERASED_BYTE);

        flash.write(self.address, &bytes)
    }

    /// Verifies the stored checksum against caller-supplied key and value
    /// bytes (typically just read or just written).
    pub fn verify<C: ChecksumAlgorithm>(
        &self,
        checksum: &mut C,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), EntryError> {
        if self.compute_checksum(checksum, key, value) != self.header.checksum {
            return Err(EntryError::ChecksumMismatch);
        }
        Ok(())
    }

    /// Verifies the stored checksum against the key and value bytes as they
    /// exist on flash.
    pub fn verify_in_flash<F: FlashPartition, C: ChecksumAlgorithm>(
        &self,
        flash: &F,
        checksum: &mut C,
    ) -> Result<(), EntryError> {
        let mut key = [0u8; Self::MAX_KEY_LENGTH];
        let key = &mut key[..self.key_length()];
        flash.read(self.key_address(), key)?;

        let mut value = vec![0u8; self.value_size()];
        flash.read(self.value_address(), &mut value)?;

        if self.compute_checksum(checksum, key, &value) != self.header.checksum {
            return Err(EntryError::ChecksumMismatch);
        }
        Ok(())
    }

    /// Digest over the header (checksum field zeroed), key, and value.
    fn compute_checksum<C: ChecksumAlgorithm>(
        &self,
        checksum: &mut C,
        key: &[u8],
        value: &[u8],
    ) -> u32 {
        let mut header = self.header;
        header.checksum = 0;

        checksum.reset();
        checksum.update(&header.to_bytes());
        checksum.update(key);
        checksum.update(value);
        u32::from_le_bytes(checksum.digest())
    }

    fn key_address(&self) -> Address {
        self.address + Self::HEADER_BYTES as Address
    }

    fn value_address(&self) -> Address {
        self.key_address() + self.key_length() as Address
    }
}
