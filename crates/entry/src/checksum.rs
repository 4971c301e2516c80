use crc32fast::Hasher as Crc32Hasher;

/// Stateful checksum capability used to protect entries.
///
/// The engine treats the algorithm as a black box: it feeds bytes through
/// [`update`](ChecksumAlgorithm::update) and stores or compares the first
/// four bytes of the digest. Algorithms with wider digests truncate.
pub trait ChecksumAlgorithm {
    /// Clears internal state; must be called before hashing a new entry.
    fn reset(&mut self);

    /// Folds `data` into the digest.
    fn update(&mut self, data: &[u8]);

    /// First four bytes of the current digest, little-endian.
    fn digest(&mut self) -> [u8; 4];
}

/// CRC-32 (IEEE) checksum, the default entry protection.
#[derive(Clone)]
pub struct Crc32 {
    hasher: Crc32Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self {
            hasher: Crc32Hasher::new(),
        }
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumAlgorithm for Crc32 {
    fn reset(&mut self) {
        self.hasher.reset();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn digest(&mut self) -> [u8; 4] {
        // finalize() consumes the hasher; digest must not disturb the
        // running state, so it finalizes a copy.
        self.hasher.clone().finalize().to_le_bytes()
    }
}
