//! Dedup memo for flattened output
//!
//! Remembers a 64-bit FNV fingerprint of every formatted edge record written
//! in the current segment, so each distinct caller→callee edge is logged once.

use std::hash::Hasher;

use fnv::{FnvHashSet, FnvHasher};

/// Fingerprint of a formatted record
pub fn fingerprint(record: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(record);
    hasher.finish()
}

#[derive(Debug, Default)]
pub struct DedupMemo {
    fingerprints: FnvHashSet<u64>,
}

impl DedupMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// True (and remembered) the first time `record` is seen since the last clear
    pub fn uniq(&mut self, record: &[u8]) -> bool {
        self.uniq_fingerprint(fingerprint(record))
    }

    pub fn uniq_fingerprint(&mut self, key: u64) -> bool {
        self.fingerprints.insert(key)
    }

    /// Forget all fingerprints, keeping the table's allocation
    pub fn clear(&mut self) {
        self.fingerprints.clear();
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}
