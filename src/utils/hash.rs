use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

/// Streaming xxh3 hasher usable through [`Hash`].
///
/// Cache keys and content hashes are built with this instead of the
/// randomly seeded std hasher so identical inputs hash identically across
/// every cache in the process.
pub struct ContentHasher(Xxh3);

impl ContentHasher {
    pub fn new() -> Self {
        Self(Xxh3::new())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for ContentHasher {
    fn finish(&self) -> u64 {
        self.0.digest()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

pub fn content_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = ContentHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
