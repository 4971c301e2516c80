/// The operation error taxonomy.
///
/// Every store operation reports failures through [`Error`]. Lower-layer
/// errors ([`entry::EntryError`], [`cache::CacheError`], raw
/// [`flash::FlashError`]) convert into it at the engine boundary so callers
/// match on one enum.
use cache::CacheError;
use entry::EntryError;
use flash::FlashError;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The key is absent or tombstoned; or a scan reached erased flash.
    #[error("key not found")]
    NotFound,

    /// A different key with the same hash is already stored. The store
    /// keeps at most one key per hash; pick a different key name.
    #[error("key hash collides with an existing key")]
    HashCollision,

    /// A caller-supplied argument is outside its legal range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The store has not been mounted (or was reset).
    #[error("store is not mounted")]
    NotMounted,

    /// The descriptor table is full or no sector can fit the entry.
    #[error("out of space")]
    NoSpace,

    /// The output buffer was smaller than the value. `copied` bytes were
    /// written into the buffer; the rest can be fetched with an offset
    /// read.
    #[error("buffer too small: copied {copied} of {value_size} bytes")]
    BufferTooSmall { copied: usize, value_size: usize },

    /// Stored data failed validation (checksum, magic, or redundant-copy
    /// consistency).
    #[error("data corruption: {0}")]
    Corrupt(&'static str),

    /// An internal invariant failed; the partition should be remounted.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// The flash driver reported a failure.
    #[error("flash driver error: {0}")]
    Flash(#[from] FlashError),
}

impl From<EntryError> for Error {
    fn from(e: EntryError) -> Self {
        match e {
            EntryError::Erased => Error::NotFound,
            EntryError::UnknownMagic { .. } => Error::Corrupt("unrecognized entry magic"),
            EntryError::Malformed(reason) => Error::Corrupt(reason),
            EntryError::ChecksumMismatch => Error::Corrupt("entry checksum mismatch"),
            EntryError::OffsetOutOfRange { .. } => {
                Error::InvalidArgument("read offset exceeds value size")
            }
            EntryError::Flash(e) => Error::Flash(e),
        }
    }
}

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Full => Error::NoSpace,
            CacheError::CopiesShareSector => Error::Corrupt("redundant copies share a sector"),
            CacheError::TooManyCopies => {
                Error::Corrupt("more copies than the configured redundancy")
            }
        }
    }
}
