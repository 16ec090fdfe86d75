//! Immutable zero-copy byte string views.
//!
//! A [`ByteString`] is a `(storage, start, end)` triple. Substrings, fields
//! and split results are new views over the same storage; only
//! [`ByteString::copy_of`], [`ByteString::append`] and the builder allocate.

use crate::buffer::Storage;
use crate::config::COPY_BLOCK_SIZE;
use crate::error::NumberError;
use crate::hash::PolyHash;
use crate::packed;
use memchr::memmem;
use serde::{Serialize, Serializer};
use std::borrow::{Borrow, Cow};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Clone)]
pub struct ByteString {
    storage: Arc<Storage>,
    start: usize,
    end: usize,
}

impl ByteString {
    pub(crate) fn from_parts(storage: Arc<Storage>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= storage.as_slice().len());
        Self {
            storage,
            start,
            end,
        }
    }

    pub fn empty() -> Self {
        Self::from_static(b"")
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::from_parts(Arc::new(Storage::Static(bytes)), 0, bytes.len())
    }

    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.as_slice()[self.start..self.end]
    }

    pub fn byte_at(&self, index: usize) -> u8 {
        assert!(
            index < self.len(),
            "index {} out of range for length {}",
            index,
            self.len()
        );
        self.as_bytes()[index]
    }

    /// View of `from..to`, relative to this string.
    pub fn substring(&self, from: usize, to: usize) -> Self {
        assert!(
            from <= to && to <= self.len(),
            "substring {}..{} out of range for length {}",
            from,
            to,
            self.len()
        );
        Self::from_parts(
            Arc::clone(&self.storage),
            self.start + from,
            self.start + to,
        )
    }

    pub fn substring_from(&self, from: usize) -> Self {
        self.substring(from, self.len())
    }

    /// View of a packed range relative to this string.
    pub fn slice_packed(&self, index: i64) -> Self {
        let r = packed::range(index);
        self.substring(r.start, r.end)
    }

    /// Packed range of `other` relative to this string, when `other` is a view into it.
    pub fn packed_offset_of(&self, other: &ByteString) -> Option<i64> {
        if !Arc::ptr_eq(&self.storage, &other.storage)
            || other.start < self.start
            || other.end > self.end
        {
            return None;
        }
        Some(packed::encode(
            (other.start - self.start) as i64,
            (other.end - self.start) as i64,
        ))
    }

    /// Materializing copy into fresh storage.
    pub fn copy_of(&self) -> Self {
        Self::copy_from_slice(self.as_bytes())
    }

    pub fn shares_storage_with(&self, other: &ByteString) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn starts_with(&self, prefix: impl AsRef<[u8]>) -> bool {
        self.as_bytes().starts_with(prefix.as_ref())
    }

    pub fn ends_with(&self, suffix: impl AsRef<[u8]>) -> bool {
        self.as_bytes().ends_with(suffix.as_ref())
    }

    pub fn index_of_byte(&self, b: u8, from: usize) -> Option<usize> {
        if from >= self.len() {
            return None;
        }
        memchr::memchr(b, &self.as_bytes()[from..]).map(|i| i + from)
    }

    pub fn last_index_of_byte(&self, b: u8) -> Option<usize> {
        memchr::memrchr(b, self.as_bytes())
    }

    /// First occurrence of `needle` at or after `from`.
    pub fn index_of(&self, needle: impl AsRef<[u8]>, from: usize) -> Option<usize> {
        let needle = needle.as_ref();
        match needle.len() {
            0 => (from <= self.len()).then_some(from),
            1 => self.index_of_byte(needle[0], from),
            _ => {
                if from >= self.len() {
                    return None;
                }
                memmem::find(&self.as_bytes()[from..], needle).map(|i| i + from)
            }
        }
    }

    /// Non-empty fields between occurrences of `sep`.
    ///
    /// Consecutive separators do not produce empty fields.
    pub fn split<'a>(&'a self, sep: &'a [u8]) -> Split<'a> {
        Split {
            inner: self.split_indices(sep),
        }
    }

    /// Like [`ByteString::split`], yielding packed ranges relative to this string.
    pub fn split_indices<'a>(&'a self, sep: &'a [u8]) -> SplitIndices<'a> {
        assert!(!sep.is_empty(), "separator must not be empty");
        SplitIndices {
            source: self,
            sep,
            pos: 0,
        }
    }

    /// View spanning fields `start..end` (half-open, counted like [`ByteString::split`]).
    ///
    /// Missing fields are clamped: past the last field the result is empty.
    pub fn fields(&self, sep: &[u8], start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "field start {} is greater than field end {}",
            start,
            end
        );
        if start == end {
            return self.substring(self.len(), self.len());
        }
        let mut first = None;
        let mut last = None;
        for (i, idx) in self.split_indices(sep).enumerate() {
            if i == start {
                first = Some(packed::start(idx) as usize);
            }
            if i >= start {
                last = Some(packed::end(idx) as usize);
            }
            if i + 1 >= end {
                break;
            }
        }
        match (first, last) {
            (Some(f), Some(l)) => self.substring(f, l),
            _ => self.substring(self.len(), self.len()),
        }
    }

    pub fn field(&self, sep: &[u8], index: usize) -> Self {
        self.fields(sep, index, index + 1)
    }

    /// View without leading and trailing ASCII whitespace.
    pub fn trim(&self) -> Self {
        let bytes = self.as_bytes();
        let from = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        let to = bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(from, |i| i + 1);
        self.substring(from, to)
    }

    /// Concatenation into new storage.
    pub fn append(&self, other: &ByteString) -> Self {
        let mut out = Vec::with_capacity(self.len() + other.len());
        out.extend_from_slice(self.as_bytes());
        out.extend_from_slice(other.as_bytes());
        Self::from(out)
    }

    pub fn to_long(&self) -> Result<i64, NumberError> {
        self.to_long_radix(10)
    }

    /// Parses an optionally signed integer in `radix` (2..=36).
    pub fn to_long_radix(&self, radix: u32) -> Result<i64, NumberError> {
        if !(2..=36).contains(&radix) {
            return Err(NumberError::BadRadix(radix));
        }
        let bytes = self.as_bytes();
        let (negative, digits) = match bytes.first() {
            Some(b'-') => (true, &bytes[1..]),
            Some(b'+') => (false, &bytes[1..]),
            _ => (false, bytes),
        };
        if digits.is_empty() {
            return Err(NumberError::Empty);
        }
        // Accumulate negatively so i64::MIN parses.
        let mut acc: i64 = 0;
        for &b in digits {
            let digit = (b as char)
                .to_digit(radix)
                .ok_or(NumberError::InvalidDigit {
                    digit: b as char,
                    radix,
                })?;
            acc = acc
                .checked_mul(radix as i64)
                .and_then(|v| v.checked_sub(digit as i64))
                .ok_or(NumberError::Overflow)?;
        }
        if negative {
            Ok(acc)
        } else {
            acc.checked_neg().ok_or(NumberError::Overflow)
        }
    }

    pub fn to_int(&self) -> Result<i32, NumberError> {
        self.to_int_radix(10)
    }

    pub fn to_int_radix(&self, radix: u32) -> Result<i32, NumberError> {
        i32::try_from(self.to_long_radix(radix)?).map_err(|_| NumberError::Overflow)
    }

    #[inline]
    pub fn hash_with(&self, hash: &PolyHash) -> u64 {
        hash.hash(self.as_bytes())
    }

    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Writes the bytes; views into big storage are written in blocks.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match &*self.storage {
            Storage::Big(big) => big.write_range_to(self.start..self.end, writer),
            _ => {
                for block in self.as_bytes().chunks(COPY_BLOCK_SIZE) {
                    writer.write_all(block)?;
                }
                Ok(())
            }
        }
    }
}

pub struct SplitIndices<'a> {
    source: &'a ByteString,
    sep: &'a [u8],
    pos: usize,
}

impl Iterator for SplitIndices<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let len = self.source.len();
        while self.pos < len {
            let from = self.pos;
            let to = self.source.index_of(self.sep, from).unwrap_or(len);
            self.pos = if to == len { len } else { to + self.sep.len() };
            if to > from {
                return Some(packed::encode(from as i64, to as i64));
            }
        }
        None
    }
}

pub struct Split<'a> {
    inner: SplitIndices<'a>,
}

impl Iterator for Split<'_> {
    type Item = ByteString;

    fn next(&mut self) -> Option<ByteString> {
        let idx = self.inner.next()?;
        Some(self.inner.source.slice_packed(idx))
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Borrow<[u8]> for ByteString {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for ByteString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteString {}

impl PartialEq<[u8]> for ByteString {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for ByteString {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

impl PartialEq<str> for ByteString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for ByteString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialOrd for ByteString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Unsigned lexicographic byte order.
impl Ord for ByteString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for ByteString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self::from_parts(Arc::new(Storage::Heap(bytes)), 0, len)
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self::copy_from_slice(s.as_bytes())
    }
}

impl From<String> for ByteString {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{:?}", self.to_str_lossy())
    }
}

impl Serialize for ByteString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_str_lossy())
    }
}

impl Default for ByteString {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bs(s: &str) -> ByteString {
        ByteString::from(s)
    }

    #[test]
    fn split_on_multi_byte_separator() {
        let parts: Vec<ByteString> = bs("a||b||c||d||e").split(b"||").collect();
        assert_eq!(parts, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn split_skips_empty_fields() {
        let parts: Vec<ByteString> = bs(" a  b   c ").split(b" ").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        let parts: Vec<ByteString> = bs("||x||||y||").split(b"||").collect();
        assert_eq!(parts, vec!["x", "y"]);
    }

    #[test]
    fn split_of_separator_only_is_empty() {
        assert_eq!(bs("||||").split(b"||").count(), 0);
        assert_eq!(bs("").split(b"|").count(), 0);
    }

    #[test]
    fn split_results_share_storage() {
        let source = bs("en Berlin 42");
        for part in source.split(b" ") {
            assert!(part.shares_storage_with(&source));
        }
    }

    #[test]
    fn substring_is_a_view() {
        let s = bs("hello world");
        let sub = s.substring(6, 11);
        assert_eq!(sub, "world");
        assert!(sub.shares_storage_with(&s));
        let copy = sub.copy_of();
        assert_eq!(copy, sub);
        assert!(!copy.shares_storage_with(&s));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn substring_out_of_range_panics() {
        bs("abc").substring(1, 4);
    }

    #[test]
    fn index_of_variants() {
        let s = bs("abcabc");
        assert_eq!(s.index_of_byte(b'c', 0), Some(2));
        assert_eq!(s.index_of_byte(b'c', 3), Some(5));
        assert_eq!(s.index_of_byte(b'z', 0), None);
        assert_eq!(s.index_of("bc", 2), Some(4));
        assert_eq!(s.index_of("b", 0), Some(1));
        assert_eq!(s.index_of("", 6), Some(6));
        assert_eq!(s.index_of("abc", 6), None);
        assert_eq!(s.last_index_of_byte(b'a'), Some(3));
    }

    #[test]
    fn starts_and_ends_with() {
        let s = bs("<http://dbpedia.org>");
        assert!(s.starts_with("<http"));
        assert!(s.ends_with(b">"));
        assert!(!s.starts_with("http"));
    }

    #[test]
    fn trim_ascii_whitespace() {
        assert_eq!(bs("  \tabc \r\n").trim(), "abc");
        assert_eq!(bs("   ").trim(), "");
        assert_eq!(bs("x").trim(), "x");
    }

    #[test]
    fn append_concatenates() {
        let joined = bs("foo").append(&bs("bar"));
        assert_eq!(joined, "foobar");
    }

    #[test]
    fn compare_is_unsigned_lexicographic() {
        assert!(bs("abc") < bs("abd"));
        assert!(bs("ab") < bs("abc"));
        assert!(ByteString::from(vec![0x7f]) < ByteString::from(vec![0x80]));
        assert_eq!(bs("same").cmp(&bs("same")), Ordering::Equal);
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(bs("42").to_long(), Ok(42));
        assert_eq!(bs("-17").to_long(), Ok(-17));
        assert_eq!(bs("+5").to_int(), Ok(5));
        assert_eq!(bs("ff").to_long_radix(16), Ok(255));
        assert_eq!(bs("-101").to_int_radix(2), Ok(-5));
        assert_eq!(bs("-9223372036854775808").to_long(), Ok(i64::MIN));
    }

    #[test]
    fn parse_number_errors() {
        assert_eq!(bs("").to_long(), Err(NumberError::Empty));
        assert_eq!(bs("-").to_long(), Err(NumberError::Empty));
        assert_eq!(
            bs("12x").to_long(),
            Err(NumberError::InvalidDigit {
                digit: 'x',
                radix: 10
            })
        );
        assert_eq!(bs("9223372036854775808").to_long(), Err(NumberError::Overflow));
        assert_eq!(bs("3000000000").to_int(), Err(NumberError::Overflow));
        assert_eq!(bs("1").to_long_radix(40), Err(NumberError::BadRadix(40)));
    }

    #[test]
    fn fields_extracts_ranges() {
        let line = bs("en Berlin 42 1024");
        assert_eq!(line.fields(b" ", 0, 1), "en");
        assert_eq!(line.fields(b" ", 0, 2), "en Berlin");
        assert_eq!(line.fields(b" ", 1, 3), "Berlin 42");
        assert_eq!(line.field(b" ", 3), "1024");
        assert_eq!(line.fields(b" ", 2, 10), "42 1024");
        assert_eq!(line.field(b" ", 7), "");
        assert_eq!(line.fields(b" ", 1, 1), "");
    }

    #[test]
    fn fields_skip_adjacent_separators() {
        let line = bs("a  b   c");
        assert_eq!(line.field(b" ", 1), "b");
        assert_eq!(line.fields(b" ", 1, 3), "b   c");
    }

    #[test]
    #[should_panic(expected = "greater than field end")]
    fn fields_reversed_range_panics() {
        bs("a b").fields(b" ", 2, 1);
    }

    #[test]
    fn packed_offsets_roundtrip_through_views() {
        let chunk = bs("one\ntwo\nthree");
        let idx: Vec<i64> = chunk.split_indices(b"\n").collect();
        assert_eq!(idx.len(), 3);
        assert_eq!(chunk.slice_packed(idx[2]), "three");
        let two = chunk.slice_packed(idx[1]);
        assert_eq!(chunk.packed_offset_of(&two), Some(idx[1]));
        assert_eq!(chunk.packed_offset_of(&bs("two")), None);
    }

    #[test]
    fn hash_and_eq_ignore_storage() {
        use std::collections::hash_map::DefaultHasher;
        let a = bs("x y").field(b" ", 1);
        let b = ByteString::from_static(b"y");
        assert_eq!(a, b);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn display_and_write() {
        let s = bs("Berlin");
        assert_eq!(s.to_string(), "Berlin");
        let mut out = Vec::new();
        s.write_to(&mut out).unwrap();
        assert_eq!(out, b"Berlin");
    }
}
