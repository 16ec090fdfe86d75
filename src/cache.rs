//! Persisted multimap bucket tables (`<source>.idx.snappy`).
//!
//! Layout inside the snappy frame stream, big-endian:
//! `[bucketCount:i32] { [bucketLen:i32] { packedIndex:i64 }* }*`.
//! The file is a cache: a missing, stale or corrupt index yields `Ok(None)`
//! and the caller rebuilds.

use crate::config::INDEX_SUFFIX;
use crate::packed;
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `<dir>/<file name>.idx.snappy` beside the source.
pub fn index_path(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(INDEX_SUFFIX);
    source.with_file_name(name)
}

/// Serializes the table and writes it atomically via rename.
pub fn save_buckets(path: &Path, buckets: &[Vec<i64>]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let tmp_path = path.with_extension("snappy.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp index file: {:?}", tmp_path))?;
    let mut writer = snap::write::FrameEncoder::new(BufWriter::new(file));

    write_table(&mut writer, buckets).context("Failed to serialize bucket table")?;
    writer.flush().context("Failed to flush bucket table")?;
    drop(writer);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp index file to: {:?}", path))?;

    info!(
        buckets = buckets.len(),
        records = buckets.iter().map(Vec::len).sum::<usize>(),
        path = ?path,
        "Bucket index saved"
    );
    Ok(())
}

fn write_table<W: Write>(w: &mut W, buckets: &[Vec<i64>]) -> io::Result<()> {
    w.write_all(&(buckets.len() as i32).to_be_bytes())?;
    for bucket in buckets {
        w.write_all(&(bucket.len() as i32).to_be_bytes())?;
        for idx in bucket {
            w.write_all(&idx.to_be_bytes())?;
        }
    }
    Ok(())
}

fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(i32::from_be_bytes(b))
}

fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_be_bytes(b))
}

fn read_table<R: Read>(r: &mut R, data_len: u64) -> Result<Vec<Vec<i64>>> {
    let count = read_i32(r)?;
    if count <= 0 || !(count as u32).is_power_of_two() {
        bail!("bucket count {} is not a positive power of two", count);
    }
    let mut buckets = Vec::with_capacity(count as usize);
    for b in 0..count {
        let len = read_i32(r)?;
        if len < 0 {
            bail!("bucket {} has negative length {}", b, len);
        }
        let mut bucket = Vec::with_capacity((len as usize).min(1 << 16));
        for _ in 0..len {
            let idx = read_i64(r)?;
            if packed::start(idx) < 0 || packed::end(idx) as u64 > data_len {
                bail!(
                    "index {}..{} outside source of {} bytes",
                    packed::start(idx),
                    packed::end(idx),
                    data_len
                );
            }
            bucket.push(idx);
        }
        buckets.push(bucket);
    }
    let mut extra = [0u8; 1];
    if r.read(&mut extra)? != 0 {
        bail!("trailing bytes after bucket table");
    }
    Ok(buckets)
}

/// Loads the table without staleness checks; every failure is an error.
pub fn load_buckets(path: &Path, data_len: u64) -> Result<Vec<Vec<i64>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open index file: {:?}", path))?;
    let mut reader = snap::read::FrameDecoder::new(BufReader::new(file));
    read_table(&mut reader, data_len)
        .with_context(|| format!("Failed to read index file: {:?}", path))
}

/// Returns `Ok(Some(table))` if the index is present, newer than the source
/// and well-formed; `Ok(None)` if missing, stale or corrupt.
pub fn try_load_buckets(
    path: &Path,
    source: &Path,
    data_len: u64,
) -> Result<Option<Vec<Vec<i64>>>> {
    if !path.exists() {
        return Ok(None);
    }

    let index_mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    let source_mtime = fs::metadata(source)
        .with_context(|| format!("Failed to get metadata for: {:?}", source))?
        .modified()
        .ok();
    if let (Some(index_mtime), Some(source_mtime)) = (index_mtime, source_mtime) {
        if source_mtime > index_mtime {
            info!(path = ?path, "Source changed since index was written");
            return Ok(None);
        }
    }

    match load_buckets(path, data_len) {
        Ok(buckets) => {
            info!(buckets = buckets.len(), path = ?path, "Bucket index loaded");
            Ok(Some(buckets))
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Index file is corrupt or unreadable");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_table() -> Vec<Vec<i64>> {
        let mut t = vec![Vec::new(); 16];
        t[3] = vec![packed::encode(0, 5), packed::encode(12, 20)];
        t[9] = vec![packed::encode(6, 11)];
        t
    }

    fn touch_source(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("pageviews.txt");
        fs::write(&path, vec![b'x'; 32]).unwrap();
        path
    }

    #[test]
    fn index_path_sits_beside_source() {
        assert_eq!(
            index_path(Path::new("/data/links.txt")),
            PathBuf::from("/data/links.txt.idx.snappy")
        );
        assert_eq!(
            index_path(Path::new("dump.nt.bz2")),
            PathBuf::from("dump.nt.bz2.idx.snappy")
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let source = touch_source(&dir);
        let path = index_path(&source);
        save_buckets(&path, &sample_table()).unwrap();
        let loaded = try_load_buckets(&path, &source, 32).unwrap().unwrap();
        assert_eq!(loaded, sample_table());
    }

    #[test]
    fn missing_index_is_none() {
        let dir = TempDir::new().unwrap();
        let source = touch_source(&dir);
        assert!(try_load_buckets(&index_path(&source), &source, 32)
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_index_is_none() {
        let dir = TempDir::new().unwrap();
        let source = touch_source(&dir);
        let path = index_path(&source);
        fs::write(&path, b"not a snappy stream").unwrap();
        assert!(try_load_buckets(&path, &source, 32).unwrap().is_none());
        assert!(load_buckets(&path, 32).is_err());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = touch_source(&dir);
        let path = index_path(&source);
        save_buckets(&path, &sample_table()).unwrap();
        // Source shrank below the last indexed record.
        assert!(try_load_buckets(&path, &source, 10).unwrap().is_none());
    }

    #[test]
    fn non_power_of_two_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = touch_source(&dir);
        let path = index_path(&source);
        save_buckets(&path, &vec![Vec::new(); 3]).unwrap();
        assert!(try_load_buckets(&path, &source, 32).unwrap().is_none());
    }
}
