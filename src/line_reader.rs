//! Incremental line splitting over a growable read buffer.
//!
//! Each refill reads one block into fresh storage, carrying over the
//! unfinished tail of the previous block. Lines are views into their block,
//! so they stay valid after the reader moves on. A line longer than half the
//! buffer doubles its capacity for the next refill.

use crate::bytestring::ByteString;
use crate::config::READ_BUFFER_SIZE;
use crate::io::open_read;
use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::Path;

pub struct LineReader<R> {
    reader: R,
    block: ByteString,
    pos: usize,
    capacity: usize,
    eof: bool,
    lines: u64,
}

impl LineReader<Box<dyn Read + Send>> {
    /// Reads `path`, decompressing by suffix.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(open_read(path)?))
    }
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, READ_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            block: ByteString::empty(),
            pos: 0,
            capacity: capacity.max(2),
            eof: false,
            lines: 0,
        }
    }

    /// Current read buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lines_read(&self) -> u64 {
        self.lines
    }

    /// Next line without its `\n`; the last line needs no terminator.
    pub fn next_line(&mut self) -> Result<Option<ByteString>> {
        loop {
            if let Some(nl) = self.block.index_of_byte(b'\n', self.pos) {
                let line = self.block.substring(self.pos, nl);
                self.pos = nl + 1;
                self.lines += 1;
                return Ok(Some(line));
            }
            if self.eof {
                if self.pos < self.block.len() {
                    let line = self.block.substring_from(self.pos);
                    self.pos = self.block.len();
                    self.lines += 1;
                    return Ok(Some(line));
                }
                return Ok(None);
            }
            self.refill().context("Failed to read line block")?;
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let tail = &self.block.as_bytes()[self.pos..];
        if tail.len() >= self.capacity / 2 {
            self.capacity *= 2;
        }
        let mut buf = vec![0u8; self.capacity];
        buf[..tail.len()].copy_from_slice(tail);
        let mut filled = tail.len();

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buf.truncate(filled);
        self.block = ByteString::from(buf);
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = Result<ByteString>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
