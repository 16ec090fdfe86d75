//! Streaming k-way merge over sorted record sources.
//!
//! One element per stream is buffered. Each step selects the smallest
//! buffered element, marks only its stream for refill, and fires the consumer
//! when every stream's buffered element agrees under the record comparator.
//! This catches the instants at which all cursors sit on the same key; it is
//! not a general equi-join and does not enumerate duplicate-key combinations.

use crate::builder::ByteStringBuilder;
use crate::bytestring::ByteString;
use crate::extract::{Extract, Fields};
use crate::io::create_write;
use crate::line_reader::LineReader;
use crate::packed;
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// A pull source of records, already sorted by the merge's stream comparator.
pub trait MergeStream {
    fn next_record(&mut self) -> Result<Option<ByteString>>;
}

impl<R: Read> MergeStream for LineReader<R> {
    fn next_record(&mut self) -> Result<Option<ByteString>> {
        self.next_line()
    }
}

impl<S: MergeStream + ?Sized> MergeStream for Box<S> {
    fn next_record(&mut self) -> Result<Option<ByteString>> {
        (**self).next_record()
    }
}

/// Adapts an in-memory iterator.
pub struct IterStream<I>(pub I);

impl<I: Iterator<Item = ByteString>> MergeStream for IterStream<I> {
    fn next_record(&mut self) -> Result<Option<ByteString>> {
        Ok(self.0.next())
    }
}

/// Runs the merge to completion and returns how many groups were emitted.
///
/// `consumer` receives one buffered record per stream, in stream order.
pub fn merge_join<S, C, R, F>(
    streams: &mut [S],
    stream_cmp: C,
    record_cmp: R,
    mut consumer: F,
) -> Result<u64>
where
    S: MergeStream,
    C: Fn(&ByteString, &ByteString) -> Ordering,
    R: Fn(&ByteString, &ByteString) -> Ordering,
    F: FnMut(&[ByteString]) -> Result<()>,
{
    let n = streams.len();
    let mut slots: Vec<Option<ByteString>> = vec![None; n];
    let mut needs_refill = vec![true; n];
    let mut exhausted = vec![false; n];
    let mut groups = 0u64;
    let mut group = Vec::with_capacity(n);

    loop {
        for i in 0..n {
            if needs_refill[i] && !exhausted[i] {
                slots[i] = streams[i]
                    .next_record()
                    .with_context(|| format!("Failed to read merge stream {}", i))?;
                if slots[i].is_none() {
                    exhausted[i] = true;
                    debug!(stream = i, "Merge stream exhausted");
                }
            }
            needs_refill[i] = false;
        }

        let mut min: Option<usize> = None;
        for (i, slot) in slots.iter().enumerate() {
            if let Some(record) = slot {
                let smaller = match min.and_then(|m| slots[m].as_ref()) {
                    Some(best) => stream_cmp(record, best) == Ordering::Less,
                    None => true,
                };
                if smaller {
                    min = Some(i);
                }
            }
        }
        let Some(min) = min else {
            break;
        };
        needs_refill[min] = true;

        group.clear();
        if let Some(Some(first)) = slots.first() {
            let all_equal = slots.iter().all(|slot| {
                slot.as_ref()
                    .is_some_and(|r| record_cmp(r, first) == Ordering::Equal)
            });
            if all_equal {
                group.extend(slots.iter().flatten().cloned());
                consumer(&group)?;
                groups += 1;
            }
        }
    }

    Ok(groups)
}

/// Splits `record` around its `key` view, dropping the separators that
/// bordered the key. A key that is not a view into `record` leaves the whole
/// record after it.
fn around_key(record: &ByteString, key: &ByteString, sep: &[u8]) -> (ByteString, ByteString) {
    let range = record
        .packed_offset_of(key)
        .map(packed::range)
        .unwrap_or(0..0);
    let mut before = record.substring(0, range.start);
    let mut after = record.substring_from(range.end);
    if !sep.is_empty() {
        while before.ends_with(sep) {
            before = before.substring(0, before.len() - sep.len());
        }
        while after.starts_with(sep) {
            after = after.substring_from(sep.len());
        }
    }
    (before, after)
}

/// Merge-joins sorted line files on `key` and writes one line per group:
/// the key, then for each stream the fields before and after its key, all
/// joined by the key separator. Empty parts are left out.
pub fn join_files<P: AsRef<Path>>(
    inputs: &[P],
    key: &Fields,
    output: impl AsRef<Path>,
) -> Result<u64> {
    let output = output.as_ref();
    let mut streams = inputs
        .iter()
        .map(LineReader::open)
        .collect::<Result<Vec<_>>>()?;
    let mut out = create_write(output)?;
    let mut line = ByteStringBuilder::new();

    let by_key = |a: &ByteString, b: &ByteString| key.extract(a).cmp(&key.extract(b));
    let groups = merge_join(&mut streams, by_key, by_key, |group| {
        line.clear().append(&key.extract(&group[0]));
        for record in group {
            let (before, after) = around_key(record, &key.extract(record), key.sep());
            for part in [before, after] {
                if !part.is_empty() {
                    line.append_bytes(key.sep()).append(&part);
                }
            }
        }
        line.append_byte(b'\n');
        out.write_all(line.as_bytes())?;
        Ok(())
    })?;

    out.finish()
        .with_context(|| format!("Failed to finish: {}", output.display()))?;
    info!(inputs = inputs.len(), groups, output = %output.display(), "Join complete");
    Ok(groups)
}
