//! Key/value extraction functions for chunk-indexed maps and joins.
//!
//! The engine is schema-agnostic: callers describe a key or value as a range
//! of separator-delimited fields of a record.

use crate::bytestring::ByteString;

pub trait Extract {
    fn extract(&self, record: &ByteString) -> ByteString;
}

impl<F> Extract for F
where
    F: Fn(&ByteString) -> ByteString,
{
    fn extract(&self, record: &ByteString) -> ByteString {
        self(record)
    }
}

/// The whole record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Whole;

impl Extract for Whole {
    fn extract(&self, record: &ByteString) -> ByteString {
        record.clone()
    }
}

/// Fields `start..end` of a record (see [`ByteString::fields`]); `end = None` means all remaining fields.
#[derive(Debug, Clone)]
pub struct Fields {
    sep: Vec<u8>,
    start: usize,
    end: Option<usize>,
}

impl Fields {
    pub fn range(sep: &[u8], start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "field start {} is greater than field end {}",
            start,
            end
        );
        Self {
            sep: sep.to_vec(),
            start,
            end: Some(end),
        }
    }

    pub fn first(sep: &[u8]) -> Self {
        Self::range(sep, 0, 1)
    }

    pub fn first_two(sep: &[u8]) -> Self {
        Self::range(sep, 0, 2)
    }

    /// Everything from field `start` to the end of the record.
    pub fn rest_after(sep: &[u8], start: usize) -> Self {
        Self {
            sep: sep.to_vec(),
            start,
            end: None,
        }
    }

    pub fn sep(&self) -> &[u8] {
        &self.sep
    }
}

impl Extract for Fields {
    fn extract(&self, record: &ByteString) -> ByteString {
        let end = self.end.unwrap_or(usize::MAX);
        record.fields(&self.sep, self.start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ranges() {
        let rec = ByteString::from("de Berlin 12 340");
        assert_eq!(Fields::first(b" ").extract(&rec), "de");
        assert_eq!(Fields::first_two(b" ").extract(&rec), "de Berlin");
        assert_eq!(Fields::range(b" ", 2, 3).extract(&rec), "12");
        assert_eq!(Fields::rest_after(b" ", 1).extract(&rec), "Berlin 12 340");
        assert_eq!(Whole.extract(&rec), rec);
    }

    #[test]
    fn closures_extract() {
        let last = |r: &ByteString| {
            let at = r.last_index_of_byte(b' ').map_or(0, |i| i + 1);
            r.substring_from(at)
        };
        assert_eq!(last.extract(&ByteString::from("a b c")), "c");
    }
}
