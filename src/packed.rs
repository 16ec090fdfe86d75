//! Packed byte ranges: `(start << 24) | (len & 0xFFFFFF)` in one `i64`.
//!
//! Hash tables and sort arrays store these instead of copies of the records
//! they refer to. Lengths of 16 MiB and more do not fit and are truncated to
//! their low 24 bits without any signal; callers must keep records smaller.

/// Number of bits reserved for the length.
pub const LEN_BITS: u32 = 24;

/// Mask selecting the length bits.
pub const LEN_MASK: i64 = (1 << LEN_BITS) - 1;

/// Packs the range `start..end`.
#[inline]
pub fn encode(start: i64, end: i64) -> i64 {
    (start << LEN_BITS) | ((end - start) & LEN_MASK)
}

#[inline]
pub fn start(encoded: i64) -> i64 {
    encoded >> LEN_BITS
}

#[inline]
pub fn len(encoded: i64) -> i64 {
    encoded & LEN_MASK
}

#[inline]
pub fn end(encoded: i64) -> i64 {
    start(encoded) + len(encoded)
}

/// `start..end` as `usize` bounds, for slicing.
#[inline]
pub fn range(encoded: i64) -> std::ops::Range<usize> {
    start(encoded) as usize..end(encoded) as usize
}
