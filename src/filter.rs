//! Membership filters used to drop duplicate records during ingestion.
//!
//! [`BloomFilter`] never reports a false negative and can report false
//! positives. [`MemTable`] stores the full 64-bit hash of every key, so it
//! only errs on a hash collision; good enough for opportunistic dedup, not
//! for joins whose correctness matters.

use crate::config::DEFAULT_HASH_SEED;
use crate::hash::PolyHash;
use crate::hashmap::{probe, table_size};
use tracing::debug;

pub struct BloomFilter {
    words: Vec<u64>,
    mask: u64,
    hashes: Vec<PolyHash>,
}

impl BloomFilter {
    /// A filter of `2^sz2degree` bits probed by `k` hash functions.
    pub fn new(sz2degree: u32, k: usize) -> Self {
        assert!(
            (6..=40).contains(&sz2degree),
            "bloom filter degree {} outside 6..=40",
            sz2degree
        );
        assert!(k > 0, "bloom filter needs at least one hash function");
        let bits = 1u64 << sz2degree;
        Self {
            words: vec![0; (bits / 64) as usize],
            mask: bits - 1,
            hashes: PolyHash::family(DEFAULT_HASH_SEED, k),
        }
    }

    pub fn bit_count(&self) -> u64 {
        self.mask + 1
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    /// Sets the key's bits; true if all of them were already set, meaning
    /// the key was *possibly* seen before.
    pub fn add(&mut self, key: &[u8]) -> bool {
        let mut all_set = true;
        for h in &self.hashes {
            let bit = h.hash(key) & self.mask;
            let (word, flag) = ((bit >> 6) as usize, 1u64 << (bit & 63));
            if self.words[word] & flag == 0 {
                all_set = false;
                self.words[word] |= flag;
            }
        }
        all_set
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.hashes.iter().all(|h| {
            let bit = h.hash(key) & self.mask;
            self.words[(bit >> 6) as usize] & (1u64 << (bit & 63)) != 0
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bits", &self.bit_count())
            .field("hashes", &self.hashes.len())
            .finish()
    }
}

/// Exact-hash set: remembers the 64-bit hash of each key, not its bytes.
#[derive(Debug, Clone)]
pub struct MemTable {
    slots: Vec<Option<u64>>,
    len: usize,
    hash: PolyHash,
}

impl MemTable {
    pub fn with_expected(expected: usize) -> Self {
        Self {
            slots: vec![None; table_size(expected)],
            len: 0,
            hash: PolyHash::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records the key; true if its hash was already present.
    pub fn add(&mut self, key: &[u8]) -> bool {
        let h = self.hash.hash(key);
        match self.locate(h) {
            Ok(_) => true,
            Err(Some(i)) => {
                self.slots[i] = Some(h);
                self.len += 1;
                if self.len > self.slots.len() / 4 {
                    self.grow();
                }
                false
            }
            Err(None) => {
                self.grow();
                self.add(key)
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.locate(self.hash.hash(key)).is_ok()
    }

    /// `Ok(slot)` when found, `Err(Some(free))` when absent, `Err(None)` when the probe ran out.
    fn locate(&self, h: u64) -> Result<usize, Option<usize>> {
        let mask = self.slots.len() - 1;
        for n in 0..self.slots.len() as u64 {
            let i = probe(h, n, mask);
            match self.slots[i] {
                None => return Err(Some(i)),
                Some(stored) if stored == h => return Ok(i),
                Some(_) => continue,
            }
        }
        Err(None)
    }

    fn grow(&mut self) {
        let size = self.slots.len() * 2;
        debug!(from = self.slots.len(), to = size, "Growing mem table");
        let old = std::mem::replace(&mut self.slots, vec![None; size]);
        let mask = size - 1;
        for h in old.into_iter().flatten() {
            let i = (0..size as u64)
                .map(|n| probe(h, n, mask))
                .find(|&i| self.slots[i].is_none());
            match i {
                Some(i) => self.slots[i] = Some(h),
                None => panic!("mem table probe exhausted while growing to {}", size),
            }
        }
    }
}
