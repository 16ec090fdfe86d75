//! Index-based sort of line-delimited files.
//!
//! The input is loaded into one buffer, its records are indexed as packed
//! ranges and only the index array is sorted. Output is written by streaming
//! each record's bytes in index order.

use crate::bytestring::ByteString;
use crate::io::{create_write, read_all};
use crate::packed;
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Packed ranges of every `sep`-terminated record in `chunk`.
///
/// Empty records are kept; a final record without a terminator is included,
/// a trailing terminator does not add an empty one.
pub fn record_index(chunk: &ByteString, sep: u8) -> Vec<i64> {
    let bytes = chunk.as_bytes();
    let mut index = Vec::with_capacity(bytes.len() / 64 + 1);
    let mut start = 0usize;
    for end in memchr::memchr_iter(sep, bytes) {
        index.push(packed::encode(start as i64, end as i64));
        start = end + 1;
    }
    if start < bytes.len() {
        index.push(packed::encode(start as i64, bytes.len() as i64));
    }
    index
}

/// Stable sort of `index` by the bytes each entry refers to in `chunk`.
pub fn sort_index_by<F>(chunk: &ByteString, index: &mut [i64], cmp: F)
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    let bytes = chunk.as_bytes();
    index.sort_by(|&a, &b| cmp(&bytes[packed::range(a)], &bytes[packed::range(b)]));
}

/// Byte-lexicographic [`sort_index_by`].
pub fn sort_index(chunk: &ByteString, index: &mut [i64]) {
    sort_index_by(chunk, index, |a, b| a.cmp(b));
}

/// Writes each indexed record of `chunk` followed by `\n`.
pub fn write_index<W: Write>(chunk: &ByteString, index: &[i64], out: &mut W) -> Result<()> {
    for &idx in index {
        chunk.slice_packed(idx).write_to(out)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Sorts the lines of `input` by raw bytes into `output`; returns the line count.
pub fn sort_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<usize> {
    sort_file_by(input, output, |a, b| a.cmp(b))
}

pub fn sort_file_by<F>(input: impl AsRef<Path>, output: impl AsRef<Path>, cmp: F) -> Result<usize>
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    let (input, output) = (input.as_ref(), output.as_ref());
    let start = Instant::now();

    let chunk = read_all(input)?.into_view();
    let mut index = record_index(&chunk, b'\n');
    sort_index_by(&chunk, &mut index, cmp);
    let sorted_at = start.elapsed();

    let mut out = create_write(output)?;
    write_index(&chunk, &index, &mut out)
        .with_context(|| format!("Failed to write: {}", output.display()))?;
    out.finish()
        .with_context(|| format!("Failed to finish: {}", output.display()))?;

    info!(
        lines = index.len(),
        sort_secs = sorted_at.as_secs_f64(),
        total_secs = start.elapsed().as_secs_f64(),
        input = %input.display(),
        output = %output.display(),
        "Sort complete"
    );
    Ok(index.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn lines_of(chunk: &ByteString, index: &[i64]) -> Vec<Vec<u8>> {
        index
            .iter()
            .map(|&i| chunk.slice_packed(i).as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn index_keeps_empty_records() {
        let chunk = ByteString::from("b\n\na\n");
        let index = record_index(&chunk, b'\n');
        assert_eq!(lines_of(&chunk, &index), vec![b"b".to_vec(), vec![], b"a".to_vec()]);
    }

    #[test]
    fn index_includes_unterminated_tail() {
        let chunk = ByteString::from("x\ny");
        assert_eq!(record_index(&chunk, b'\n').len(), 2);
        assert!(record_index(&ByteString::empty(), b'\n').is_empty());
    }

    #[test]
    fn sort_is_stable_under_custom_order() {
        let chunk = ByteString::from("b 1\na 2\nb 0\na 1\n");
        let mut index = record_index(&chunk, b'\n');
        // Compare on the first byte only.
        sort_index_by(&chunk, &mut index, |a, b| a[..1].cmp(&b[..1]));
        let sorted: Vec<String> = index
            .iter()
            .map(|&i| chunk.slice_packed(i).to_string())
            .collect();
        assert_eq!(sorted, vec!["a 2", "a 1", "b 1", "b 0"]);
    }

    #[test]
    fn sort_file_rewrites_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("pageviews.txt");
        let output = dir.path().join("sorted.txt.bz2");
        fs::write(&input, "en Paris 5\nde Berlin 9\nen Berlin 7\n").unwrap();

        assert_eq!(sort_file(&input, &output).unwrap(), 3);
        let lines = crate::io::read_lines(&output).unwrap();
        assert_eq!(lines, vec!["de Berlin 9", "en Berlin 7", "en Paris 5"]);
    }

    #[test]
    fn sort_file_by_reverse() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "a\nc\nb").unwrap();
        sort_file_by(&input, &output, |a, b| b.cmp(a)).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "c\nb\na\n");
    }

    proptest! {
        #[test]
        fn matches_reference_sort(lines in prop::collection::vec(
            prop::collection::vec(any::<u8>().prop_filter("no newline", |b| *b != b'\n'), 0..12),
            0..64,
        )) {
            let mut joined = Vec::new();
            for line in &lines {
                joined.extend_from_slice(line);
                joined.push(b'\n');
            }
            let chunk = ByteString::from(joined);
            let mut index = record_index(&chunk, b'\n');
            sort_index(&chunk, &mut index);

            let mut out = Vec::new();
            write_index(&chunk, &index, &mut out).unwrap();

            let mut expected_lines = lines.clone();
            expected_lines.sort();
            let mut expected = Vec::new();
            for line in &expected_lines {
                expected.extend_from_slice(line);
                expected.push(b'\n');
            }
            prop_assert_eq!(out, expected);
        }
    }
}
