/// Entry format identifiers.
///
/// A store is configured with one or more accepted formats so that images
/// written by older releases stay readable. Reads accept any configured
/// magic; all new entries are written with the primary (first) format.

/// Magic value of erased NOR flash. Reading this where a header's magic
/// belongs means the location was never written.
pub const ERASED_MAGIC: u32 = 0xFFFF_FFFF;

/// One accepted on-flash entry format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFormat {
    /// Format identifier stored in every entry header.
    pub magic: u32,
}

impl EntryFormat {
    pub const fn new(magic: u32) -> Self {
        Self { magic }
    }
}

/// Ordered set of accepted formats. The first is the write format.
#[derive(Debug, Clone)]
pub struct EntryFormats {
    formats: Vec<EntryFormat>,
}

impl EntryFormats {
    /// Builds the accepted-format set.
    ///
    /// # Panics
    ///
    /// Panics if the set is empty, contains the erased-flash sentinel, or
    /// contains duplicate magics. These are configuration bugs, not runtime
    /// conditions.
    pub fn new(formats: Vec<EntryFormat>) -> Self {
        assert!(!formats.is_empty(), "at least one entry format is required");
        for (i, f) in formats.iter().enumerate() {
            assert!(
                f.magic != ERASED_MAGIC,
                "magic {:#010x} collides with the erased-flash sentinel",
                f.magic
            );
            assert!(
                !formats[..i].iter().any(|other| other.magic == f.magic),
                "duplicate entry magic {:#010x}",
                f.magic
            );
        }
        Self { formats }
    }

    /// The format used for all new entries.
    pub fn primary(&self) -> EntryFormat {
        self.formats[0]
    }

    /// Whether `magic` matches any accepted format.
    pub fn contains(&self, magic: u32) -> bool {
        self.formats.iter().any(|f| f.magic == magic)
    }
}

impl From<EntryFormat> for EntryFormats {
    fn from(format: EntryFormat) -> Self {
        Self::new(vec![format])
    }
}
