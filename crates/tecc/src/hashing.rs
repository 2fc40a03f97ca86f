//! Stable fingerprints for cache keys and generated names.
//!
//! FNV-1a over the `Hash` byte stream; unlike the std hasher the seed is
//! fixed, so truncated global names that embed a fingerprint are the same
//! in every process.

use std::hash::{Hash, Hasher};

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Hasher for Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV1A_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Accumulates a fingerprint from tagged values.
#[derive(Debug, Clone)]
pub struct FingerprintHasher {
    inner: Fnv1a,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self {
            inner: Fnv1a(FNV1A_OFFSET),
        }
    }

    pub fn write<T: Hash + ?Sized>(&mut self, value: &T) {
        value.hash(&mut self.inner);
    }

    /// Node tag separating structurally different shapes with equal payloads.
    pub fn write_u8(&mut self, tag: u8) {
        self.inner.write_u8(tag);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.write_u64(value);
    }

    pub fn finish(self) -> u64 {
        self.inner.finish()
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FingerprintHasher::new();
    hasher.write(value);
    hasher.finish()
}
