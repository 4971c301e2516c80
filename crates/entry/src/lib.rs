//! # Entry — on-flash record codec
//!
//! Serializes and parses the single record type FlintKV persists: an entry
//! holding one key together with a value or a deletion marker (tombstone).
//! Entries are written append-only; a key's current state is whichever entry
//! carries the highest transaction id.
//!
//! ## Binary layout
//!
//! All integers little-endian. Entries start at addresses that are multiples
//! of 16 bytes.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ HEADER (16 bytes)                                          │
//! │                                                            │
//! │ magic (u32) | checksum (u32)                               │
//! │ alignment_units (u8) | key_length (u8) | value_size (u16)  │
//! │ transaction_id (u32)                                       │
//! ├────────────────────────────────────────────────────────────┤
//! │ key (key_length bytes, not NUL-terminated)                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ value (value_size bytes; absent for tombstones)            │
//! ├────────────────────────────────────────────────────────────┤
//! │ padding to the entry alignment (0xFF, never read back)     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `magic` identifies the format; `0xFFFF_FFFF` is reserved as the erased
//!   flash sentinel and can never be a configured magic.
//! - `checksum` holds the first four digest bytes over the header (with the
//!   checksum field zeroed), the key, and the value.
//! - `alignment_units` encodes the entry alignment: `(units + 1) * 16` bytes.
//! - `value_size == 0xFFFF` marks a tombstone; tombstones carry no value.
//!
//! ## Reading
//!
//! [`Entry::read`] parses a header and classifies the location: erased flash
//! (scanning stops there), an unknown magic (corruption), or a parsed entry
//! whose key and value may then be read. A parsed entry is untrusted until
//! one of the verify methods has checked its checksum.

mod checksum;
mod codec;
mod format;

pub use checksum::{ChecksumAlgorithm, Crc32};
pub use codec::{Entry, EntryHeader, KeyBuffer};
pub use format::{EntryFormat, EntryFormats, ERASED_MAGIC};

use flash::FlashError;
use thiserror::Error;

/// Errors from parsing, reading, or verifying entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntryError {
    /// The header region reads as erased flash; no entry exists here.
    #[error("erased flash, no entry present")]
    Erased,

    /// The header's magic matches no configured entry format.
    #[error("unknown entry magic {magic:#010x}")]
    UnknownMagic { magic: u32 },

    /// A parsed header field is outside its legal range.
    #[error("malformed entry header: {0}")]
    Malformed(&'static str),

    /// The stored checksum does not match the recomputed digest.
    #[error("entry checksum mismatch")]
    ChecksumMismatch,

    /// A read offset lies past the end of the value.
    #[error("read offset {offset} exceeds value size {value_size}")]
    OffsetOutOfRange { offset: usize, value_size: usize },

    /// The underlying flash driver failed.
    #[error(transparent)]
    Flash(#[from] FlashError),
}

#[cfg(test)]
mod tests;
