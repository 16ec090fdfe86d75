//! Maps over a chunk: one large byte string of separator-delimited records.
//!
//! Tables store packed record ranges, never keys or values. Lookups re-derive
//! the key of a candidate slot by running the key extractor on the record it
//! points at. Both maps are built once in a single pass and never rehash.

use crate::bytestring::ByteString;
use crate::extract::Extract;
use crate::hash::PolyHash;
use crate::hashmap::{probe, table_size};
use tracing::info;

pub(crate) enum Probe {
    Empty,
    Match,
    Other,
}

/// Walks the probe sequence of `hash`; `Ok(slot)` on a match, `Err(slot)` on the first empty slot.
pub(crate) fn locate<F>(size: usize, hash: u64, mut check: F) -> Result<usize, usize>
where
    F: FnMut(usize) -> Probe,
{
    let mask = size - 1;
    for n in 0..size as u64 {
        let i = probe(hash, n, mask);
        match check(i) {
            Probe::Empty => return Err(i),
            Probe::Match => return Ok(i),
            Probe::Other => continue,
        }
    }
    panic!("probe sequence exhausted in a table of {} slots", size)
}

/// Key → last record with that key.
pub struct ChunkMap<K, V> {
    chunk: ByteString,
    key: K,
    value: V,
    slots: Vec<Option<i64>>,
    len: usize,
    hash: PolyHash,
}

impl<K: Extract, V: Extract> ChunkMap<K, V> {
    /// Indexes every non-empty record of `chunk`; later duplicates replace earlier ones.
    pub fn build(chunk: ByteString, record_sep: &[u8], key: K, value: V) -> Self {
        let records = chunk.split_indices(record_sep).count();
        let mut map = Self {
            slots: vec![None; table_size(records)],
            chunk,
            key,
            value,
            len: 0,
            hash: PolyHash::default(),
        };

        let chunk = map.chunk.clone();
        for idx in chunk.split_indices(record_sep) {
            let k = map.key.extract(&chunk.slice_packed(idx));
            match map.locate(k.as_bytes()) {
                Ok(i) => map.slots[i] = Some(idx),
                Err(i) => {
                    map.slots[i] = Some(idx);
                    map.len += 1;
                }
            }
        }

        info!(
            records,
            keys = map.len,
            slots = map.slots.len(),
            "Chunk map built"
        );
        map
    }

    fn locate(&self, key: &[u8]) -> Result<usize, usize> {
        locate(self.slots.len(), self.hash.hash(key), |i| match self.slots[i] {
            None => Probe::Empty,
            Some(idx) if self.key.extract(&self.chunk.slice_packed(idx)) == key => Probe::Match,
            Some(_) => Probe::Other,
        })
    }

    pub fn get_record(&self, key: &[u8]) -> Option<ByteString> {
        let i = self.locate(key).ok()?;
        self.slots[i].map(|idx| self.chunk.slice_packed(idx))
    }

    pub fn get(&self, key: &[u8]) -> Option<ByteString> {
        self.get_record(key).map(|r| self.value.extract(&r))
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.locate(key).is_ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn chunk(&self) -> &ByteString {
        &self.chunk
    }

    /// `(key, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (ByteString, ByteString)> + '_ {
        self.slots.iter().flatten().map(move |&idx| {
            let record = self.chunk.slice_packed(idx);
            (self.key.extract(&record), self.value.extract(&record))
        })
    }
}

/// Key → every record with that key, in chunk order.
pub struct ChunkMultiMap<K, V> {
    chunk: ByteString,
    key: K,
    value: V,
    buckets: Vec<Vec<i64>>,
    keys: usize,
    records: usize,
    hash: PolyHash,
}

impl<K: Extract, V: Extract> ChunkMultiMap<K, V> {
    pub fn build(chunk: ByteString, record_sep: &[u8], key: K, value: V) -> Self {
        let records = chunk.split_indices(record_sep).count();
        let mut map = Self {
            buckets: vec![Vec::new(); table_size(records)],
            chunk,
            key,
            value,
            keys: 0,
            records,
            hash: PolyHash::default(),
        };

        let chunk = map.chunk.clone();
        for idx in chunk.split_indices(record_sep) {
            let k = map.key.extract(&chunk.slice_packed(idx));
            match map.locate(k.as_bytes()) {
                Ok(i) => map.buckets[i].push(idx),
                Err(i) => {
                    map.buckets[i].push(idx);
                    map.keys += 1;
                }
            }
        }

        info!(
            records,
            keys = map.keys,
            slots = map.buckets.len(),
            "Chunk multimap built"
        );
        map
    }

    /// Reassembles a map from a bucket table built over the same chunk.
    pub fn from_buckets(chunk: ByteString, key: K, value: V, buckets: Vec<Vec<i64>>) -> Self {
        let keys = buckets.iter().filter(|b| !b.is_empty()).count();
        let records = buckets.iter().map(Vec::len).sum();
        Self {
            chunk,
            key,
            value,
            buckets,
            keys,
            records,
            hash: PolyHash::default(),
        }
    }

    fn locate(&self, key: &[u8]) -> Result<usize, usize> {
        locate(self.buckets.len(), self.hash.hash(key), |i| {
            match self.buckets[i].first() {
                None => Probe::Empty,
                Some(&idx) if self.key.extract(&self.chunk.slice_packed(idx)) == key => {
                    Probe::Match
                }
                Some(_) => Probe::Other,
            }
        })
    }

    pub fn get_records(&self, key: &[u8]) -> Vec<ByteString> {
        match self.locate(key) {
            Ok(i) => self.buckets[i]
                .iter()
                .map(|&idx| self.chunk.slice_packed(idx))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Vec<ByteString> {
        self.get_records(key)
            .iter()
            .map(|r| self.value.extract(r))
            .collect()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.locate(key).is_ok()
    }

    pub fn key_count(&self) -> usize {
        self.keys
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn buckets(&self) -> &[Vec<i64>] {
        &self.buckets
    }

    pub fn chunk(&self) -> &ByteString {
        &self.chunk
    }

    pub(crate) fn into_parts(self) -> (ByteString, K, V, Vec<Vec<i64>>) {
        (self.chunk, self.key, self.value, self.buckets)
    }
}
