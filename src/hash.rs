//! Polynomial byte hashing.
//!
//! `h = seed; for b in bytes { h = h * multiplier + b }` with wrapping
//! arithmetic. A family of independent functions is derived from one seed by
//! walking the odd primes starting at `HASH_MULTIPLIER`.

use crate::config::{DEFAULT_HASH_SEED, HASH_MULTIPLIER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolyHash {
    seed: u64,
    multiplier: u64,
}

impl Default for PolyHash {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SEED, HASH_MULTIPLIER)
    }
}

impl PolyHash {
    pub const fn new(seed: u64, multiplier: u64) -> Self {
        Self { seed, multiplier }
    }

    /// `k` functions sharing `seed`, each with a distinct prime multiplier.
    pub fn family(seed: u64, k: usize) -> Vec<PolyHash> {
        let mut out = Vec::with_capacity(k);
        let mut candidate = HASH_MULTIPLIER;
        while out.len() < k {
            if is_prime(candidate) {
                out.push(PolyHash::new(seed, candidate));
            }
            candidate += 2;
        }
        out
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    #[inline]
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        bytes.iter().fold(self.seed, |h, &b| {
            h.wrapping_mul(self.multiplier).wrapping_add(b as u64)
        })
    }
}

/// Hash with the default function.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    PolyHash::default().hash(bytes)
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}
