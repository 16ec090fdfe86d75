//! Multimap over a file, with a persisted bucket table.
//!
//! The first open reads the file, builds a [`ChunkMultiMap`] and saves its
//! buckets to `<file>.idx.snappy`. Later opens load that table instead. For
//! plain files the content then stays on disk and every lookup seeks to the
//! records it needs; compressed files are inflated into memory since their
//! offsets refer to the decompressed stream.
//!
//! The persisted table depends on the key extractor it was built with;
//! reopening with a different extractor requires [`FileMultiMap::rebuild`].

use crate::bytestring::ByteString;
use crate::cache;
use crate::chunk_map::ChunkMultiMap;
use crate::extract::Extract;
use crate::hash::PolyHash;
use crate::hashmap::probe;
use crate::io::{is_compressed, read_all};
use crate::packed;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

enum Source {
    Resident(ByteString),
    Disk(Mutex<File>),
}

pub struct FileMultiMap<K, V> {
    path: PathBuf,
    index_path: PathBuf,
    source: Source,
    key: K,
    value: V,
    buckets: Vec<Vec<i64>>,
    hash: PolyHash,
}

impl<K: Extract, V: Extract> FileMultiMap<K, V> {
    /// Opens `path`, reusing its persisted index when valid.
    pub fn open(path: impl AsRef<Path>, record_sep: &[u8], key: K, value: V) -> Result<Self> {
        let path = path.as_ref();
        let index_path = cache::index_path(path);

        if is_compressed(path) {
            let chunk = read_all(path)?.into_view();
            let len = chunk.len() as u64;
            if let Some(buckets) = cache::try_load_buckets(&index_path, path, len)? {
                let source = Source::Resident(chunk);
                return Ok(Self::assemble(path, index_path, source, key, value, buckets));
            }
            info!(path = %path.display(), "Building multimap index (cache miss or invalid)");
            return Ok(Self::build_from_chunk(path, index_path, chunk, record_sep, key, value));
        }

        let file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?
            .len();
        if let Some(buckets) = cache::try_load_buckets(&index_path, path, len)? {
            return Ok(Self::assemble(
                path,
                index_path,
                Source::Disk(Mutex::new(file)),
                key,
                value,
                buckets,
            ));
        }

        info!(path = %path.display(), "Building multimap index (cache miss or invalid)");
        let chunk = read_all(path)?.into_view();
        Ok(Self::build_from_chunk(path, index_path, chunk, record_sep, key, value))
    }

    /// Ignores any persisted index, rebuilds and saves it.
    pub fn rebuild(path: impl AsRef<Path>, record_sep: &[u8], key: K, value: V) -> Result<Self> {
        let path = path.as_ref();
        let chunk = read_all(path)?.into_view();
        Ok(Self::build_from_chunk(
            path,
            cache::index_path(path),
            chunk,
            record_sep,
            key,
            value,
        ))
    }

    fn build_from_chunk(
        path: &Path,
        index_path: PathBuf,
        chunk: ByteString,
        record_sep: &[u8],
        key: K,
        value: V,
    ) -> Self {
        let built = ChunkMultiMap::build(chunk, record_sep, key, value);
        if let Err(e) = cache::save_buckets(&index_path, built.buckets()) {
            warn!(error = %format!("{:#}", e), "Failed to save bucket index");
        }
        let (chunk, key, value, buckets) = built.into_parts();
        Self::assemble(path, index_path, Source::Resident(chunk), key, value, buckets)
    }

    fn assemble(
        path: &Path,
        index_path: PathBuf,
        source: Source,
        key: K,
        value: V,
        buckets: Vec<Vec<i64>>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            index_path,
            source,
            key,
            value,
            buckets,
            hash: PolyHash::default(),
        }
    }

    fn record(&self, idx: i64) -> Result<ByteString> {
        match &self.source {
            Source::Resident(chunk) => Ok(chunk.slice_packed(idx)),
            Source::Disk(file) => {
                let mut bytes = vec![0u8; packed::len(idx) as usize];
                // Every read seeks first, so a poisoned handle is still usable.
                let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
                file.seek(SeekFrom::Start(packed::start(idx) as u64))
                    .and_then(|_| file.read_exact(&mut bytes))
                    .with_context(|| {
                        format!(
                            "Failed to read record {}..{} of {}",
                            packed::start(idx),
                            packed::end(idx),
                            self.path.display()
                        )
                    })?;
                Ok(ByteString::from(bytes))
            }
        }
    }

    fn locate(&self, key: &[u8]) -> Result<Option<usize>> {
        let size = self.buckets.len();
        let (hash, mask) = (self.hash.hash(key), size - 1);
        for n in 0..size as u64 {
            let i = probe(hash, n, mask);
            match self.buckets[i].first() {
                None => return Ok(None),
                Some(&idx) => {
                    if self.key.extract(&self.record(idx)?) == key {
                        return Ok(Some(i));
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn get_records(&self, key: &[u8]) -> Result<Vec<ByteString>> {
        match self.locate(key)? {
            Some(i) => self.buckets[i].iter().map(|&idx| self.record(idx)).collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<ByteString>> {
        Ok(self
            .get_records(key)?
            .iter()
            .map(|r| self.value.extract(r))
            .collect())
    }

    /// True when the file content is held in memory.
    pub fn is_resident(&self) -> bool {
        matches!(self.source, Source::Resident(_))
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn key_count(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
