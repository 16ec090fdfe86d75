use thiserror::Error;

use crate::bytestring::ByteString;
use crate::tuple::ParseState;

/// Big-buffer allocation failed after every step of the retry ladder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to allocate {requested} bytes after {attempts} attempts")]
pub struct AllocError {
    pub requested: usize,
    pub attempts: u32,
}

/// Failure converting a byte string to an integer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumberError {
    #[error("cannot parse an integer from an empty string")]
    Empty,
    #[error("invalid digit {digit:?} for radix {radix}")]
    InvalidDigit { digit: char, radix: u32 },
    #[error("number does not fit the target type")]
    Overflow,
    #[error("radix {0} is outside 2..=36")]
    BadRadix(u32),
}

/// A line the RDF tuple parser could not accept.
///
/// `remainder` is a view of the line starting at the offending byte; it is
/// empty when the line ended before the tuple was complete.
#[derive(Debug, Error, Clone)]
#[error("{message} in state {state:?} at byte {offset}: {remainder}")]
pub struct TupleError {
    pub state: ParseState,
    pub message: &'static str,
    pub offset: usize,
    pub remainder: ByteString,
}
