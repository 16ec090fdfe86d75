//! Open-addressing tables.
//!
//! Every table in the crate probes `(hash + n²) mod 2^bits` and is sized to
//! the next power of two of at least `TABLE_LOAD_FACTOR` slots per expected
//! record. [`OpenMap`] is the general mutable map; it tracks tombstones
//! separately and rehashes in full once tombstones outnumber live entries or
//! live entries exceed a quarter of the table.

use crate::config::{MIN_TABLE_SIZE, TABLE_LOAD_FACTOR};
use rustc_hash::FxHasher;
use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::mem;
use tracing::debug;

/// Table size for `expected` records.
pub fn table_size(expected: usize) -> usize {
    expected
        .saturating_mul(TABLE_LOAD_FACTOR)
        .max(MIN_TABLE_SIZE)
        .next_power_of_two()
}

/// Slot visited at step `n` of the probe sequence for `hash`.
#[inline]
pub fn probe(hash: u64, n: u64, mask: usize) -> usize {
    (hash.wrapping_add(n.wrapping_mul(n)) as usize) & mask
}

#[derive(Debug, Clone)]
enum Slot<K, V> {
    Empty,
    Tombstone,
    Occupied(K, V),
}

fn fx_hash<Q: Hash + ?Sized>(key: &Q) -> u64 {
    let mut h = FxHasher::default();
    key.hash(&mut h);
    h.finish()
}

#[derive(Debug, Clone)]
pub struct OpenMap<K, V> {
    slots: Vec<Slot<K, V>>,
    occupied: usize,
    tombstones: usize,
}

impl<K: Hash + Eq, V> Default for OpenMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> OpenMap<K, V> {
    pub fn new() -> Self {
        Self::with_expected(0)
    }

    pub fn with_expected(expected: usize) -> Self {
        Self {
            slots: empty_slots(table_size(expected)),
            occupied: 0,
            tombstones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = fx_hash(key);
        let mask = self.mask();
        for n in 0..self.slots.len() as u64 {
            let i = probe(hash, n, mask);
            match &self.slots[i] {
                Slot::Empty => return None,
                Slot::Tombstone => continue,
                Slot::Occupied(k, _) if k.borrow() == key => return Some(i),
                Slot::Occupied(..) => continue,
            }
        }
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.find(key)?;
        match &self.slots[i] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.find(key)?;
        match &mut self.slots[i] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Inserts or replaces; returns the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(i) = self.find(&key) {
            if let Slot::Occupied(_, v) = &mut self.slots[i] {
                return Some(mem::replace(v, value));
            }
        }

        let hash = fx_hash(&key);
        let mask = self.mask();
        let free = (0..self.slots.len() as u64)
            .map(|n| probe(hash, n, mask))
            .find(|&i| !matches!(self.slots[i], Slot::Occupied(..)));

        match free {
            Some(i) => {
                if matches!(self.slots[i], Slot::Tombstone) {
                    self.tombstones -= 1;
                }
                self.slots[i] = Slot::Occupied(key, value);
                self.occupied += 1;
                self.maybe_rehash();
            }
            None => {
                // The quadratic sequence missed every free slot; grow and retry.
                self.rehash(self.slots.len() * 2);
                self.insert(key, value);
            }
        }
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.find(key)?;
        let removed = mem::replace(&mut self.slots[i], Slot::Tombstone);
        self.occupied -= 1;
        self.tombstones += 1;
        self.maybe_rehash();
        match removed {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }

    fn maybe_rehash(&mut self) {
        if self.tombstones > self.occupied || self.occupied > self.slots.len() / 4 {
            self.rehash(table_size(self.occupied.saturating_mul(2)));
        }
    }

    fn rehash(&mut self, size: usize) {
        debug!(
            from = self.slots.len(),
            to = size,
            live = self.occupied,
            tombstones = self.tombstones,
            "Rehashing open map"
        );
        let old = mem::replace(&mut self.slots, empty_slots(size));
        self.occupied = 0;
        self.tombstones = 0;
        for slot in old {
            if let Slot::Occupied(k, v) = slot {
                self.insert(k, v);
            }
        }
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for OpenMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_expected(iter.size_hint().0);
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

fn empty_slots<K, V>(size: usize) -> Vec<Slot<K, V>> {
    let mut slots = Vec::with_capacity(size);
    slots.resize_with(size, || Slot::Empty);
    slots
}
