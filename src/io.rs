//! Bulk loading and persistence.
//!
//! Files are decompressed transparently by suffix (`.gz`, `.bz2`,
//! `.snappy` framed) and written compressed the same way. Collections are
//! newline-separated records; maps are `<key> <value>` lines whose first
//! whitespace-delimited token is the key.

use crate::buffer::Buffer;
use crate::bytestring::ByteString;
use crate::config::WRITER_BUFFER_SIZE;
use crate::hashmap::OpenMap;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Snappy,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            Some("snappy") => Compression::Snappy,
            _ => Compression::None,
        }
    }
}

pub fn is_compressed(path: &Path) -> bool {
    Compression::from_path(path) != Compression::None
}

/// Opens `path` for reading, decompressing by suffix.
pub fn open_read(path: impl AsRef<Path>) -> Result<Box<dyn Read + Send>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    let reader = BufReader::with_capacity(WRITER_BUFFER_SIZE, file);
    let compression = Compression::from_path(path);
    debug!(path = %path.display(), ?compression, "Opening for read");
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
        Compression::Snappy => Box::new(snap::read::FrameDecoder::new(reader)),
    })
}

/// Output file compressed by suffix. Call [`CompressedWriter::finish`] to
/// write trailers and surface flush errors.
pub enum CompressedWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Bzip2(BzEncoder<BufWriter<File>>),
    Snappy(snap::write::FrameEncoder<BufWriter<File>>),
}

impl CompressedWriter {
    pub fn finish(self) -> Result<()> {
        match self {
            CompressedWriter::Plain(mut w) => w.flush()?,
            CompressedWriter::Gzip(enc) => enc.finish()?.flush()?,
            CompressedWriter::Bzip2(enc) => enc.finish()?.flush()?,
            // Flushing the frame encoder also flushes the file writer.
            CompressedWriter::Snappy(mut enc) => enc.flush()?,
        }
        Ok(())
    }
}

impl Write for CompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Plain(w) => w.write(buf),
            CompressedWriter::Gzip(w) => w.write(buf),
            CompressedWriter::Bzip2(w) => w.write(buf),
            CompressedWriter::Snappy(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => w.flush(),
            CompressedWriter::Gzip(w) => w.flush(),
            CompressedWriter::Bzip2(w) => w.flush(),
            CompressedWriter::Snappy(w) => w.flush(),
        }
    }
}

/// Creates `path` (and its parent directories) for writing, compressing by suffix.
pub fn create_write(path: impl AsRef<Path>) -> Result<CompressedWriter> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create: {}", path.display()))?;
    let writer = BufWriter::with_capacity(WRITER_BUFFER_SIZE, file);
    Ok(match Compression::from_path(path) {
        Compression::None => CompressedWriter::Plain(writer),
        Compression::Gzip => {
            CompressedWriter::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
        }
        Compression::Bzip2 => {
            CompressedWriter::Bzip2(BzEncoder::new(writer, bzip2::Compression::default()))
        }
        Compression::Snappy => CompressedWriter::Snappy(snap::write::FrameEncoder::new(writer)),
    })
}

/// Reads a whole file into one buffer (flipped, ready to view).
///
/// Plain files are sized exactly from their metadata and use big storage
/// beyond the wrapped-buffer limit; compressed files are inflated into a
/// growable vector first.
pub fn read_all(path: impl AsRef<Path>) -> Result<Buffer> {
    let path = path.as_ref();
    let buffer = if is_compressed(path) {
        let mut bytes = Vec::new();
        open_read(path)?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to decompress: {}", path.display()))?;
        Buffer::wrap(bytes)
    } else {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?
            .len() as usize;
        let mut buffer = Buffer::allocate(size)?;
        buffer
            .read_from(&mut file)
            .with_context(|| format!("Failed to read: {}", path.display()))?;
        buffer.flip();
        buffer
    };
    info!(path = %path.display(), bytes = buffer.remaining(), "File loaded");
    Ok(buffer)
}

/// Non-empty newline-separated records of a file, as views into one buffer.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<ByteString>> {
    let chunk = read_all(path)?.into_view();
    Ok(chunk.split(b"\n").collect())
}

pub fn write_lines<'a, I>(path: impl AsRef<Path>, lines: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a ByteString>,
{
    let path = path.as_ref();
    let mut out = create_write(path)?;
    let mut count = 0;
    for line in lines {
        line.write_to(&mut out)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.finish()
        .with_context(|| format!("Failed to finish: {}", path.display()))?;
    Ok(count)
}

/// Splits `<key> <value>` at the first ASCII whitespace; the value is trimmed.
pub fn split_key_value(line: &ByteString) -> (ByteString, ByteString) {
    let line = line.trim();
    match line.as_bytes().iter().position(|b| b.is_ascii_whitespace()) {
        Some(at) => (line.substring(0, at), line.substring_from(at).trim()),
        None => (line.clone(), line.substring_from(line.len())),
    }
}

pub fn read_map(path: impl AsRef<Path>) -> Result<OpenMap<ByteString, ByteString>> {
    let lines = read_lines(path)?;
    let mut map = OpenMap::with_expected(lines.len());
    for line in &lines {
        let (k, v) = split_key_value(line);
        if !k.is_empty() {
            map.insert(k, v);
        }
    }
    Ok(map)
}

pub fn write_map(path: impl AsRef<Path>, map: &OpenMap<ByteString, ByteString>) -> Result<usize> {
    let path = path.as_ref();
    let mut out = create_write(path)?;
    for (k, v) in map.iter() {
        k.write_to(&mut out)?;
        out.write_all(b" ")?;
        v.write_to(&mut out)?;
        out.write_all(b"\n")?;
    }
    out.finish()
        .with_context(|| format!("Failed to finish: {}", path.display()))?;
    Ok(map.len())
}
