//! N-Triples / N-Quads line parser for DBpedia dumps.
//!
//! A line is run through a byte-at-a-time state machine followed by one
//! virtual space, which flushes a language tag that ends the line. A tuple is
//! accepted only if the machine reaches [`ParseState::SkipRest`]; whatever
//! follows the object (graph name, datatype, the final `.`) is ignored.
//!
//! Inside a quoted literal only `\"` and `\\` are escapes. Any other
//! backslash pair is kept as written.

use crate::builder::ByteStringBuilder;
use crate::bytestring::ByteString;
use crate::error::TupleError;
use crate::io::open_read;
use crate::line_reader::LineReader;
use anyhow::Result;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Start,
    Subject,
    SubjectEnd,
    Predicate,
    PredicateEnd,
    /// Object in `<uri>` form.
    Object,
    /// Inside a quoted literal.
    ObjectText,
    /// After a backslash inside a literal.
    ObjectTextQuote,
    ObjectTextEnd,
    ObjectTextLang,
    SkipRest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RdfTuple {
    subject: ByteString,
    predicate: ByteString,
    object: ByteString,
    lang: Option<ByteString>,
    is_literal: bool,
}

impl RdfTuple {
    pub fn subject(&self) -> &ByteString {
        &self.subject
    }

    pub fn predicate(&self) -> &ByteString {
        &self.predicate
    }

    /// Object URI or literal text, still escaped.
    pub fn object(&self) -> &ByteString {
        &self.object
    }

    pub fn lang(&self) -> Option<&ByteString> {
        self.lang.as_ref()
    }

    pub fn is_literal(&self) -> bool {
        self.is_literal
    }

    /// Literal text with `\"` and `\\` resolved. Returns a view when there is
    /// nothing to resolve.
    pub fn object_unescaped(&self) -> ByteString {
        if !self.is_literal || self.object.index_of_byte(b'\\', 0).is_none() {
            return self.object.clone();
        }
        let bytes = self.object.as_bytes();
        let mut out = ByteStringBuilder::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match (bytes[i], bytes.get(i + 1)) {
                (b'\\', Some(&next @ (b'"' | b'\\'))) => {
                    out.append_byte(next);
                    i += 2;
                }
                (b, _) => {
                    out.append_byte(b);
                    i += 1;
                }
            }
        }
        out.build()
    }
}

/// Parses one dump line. The returned fields are views into `line`.
pub fn parse_tuple(line: &ByteString) -> Result<RdfTuple, TupleError> {
    let bytes = line.as_bytes();
    let mut state = ParseState::Start;
    let mut mark = 0;
    let mut subject = None;
    let mut predicate = None;
    let mut object = None;
    let mut lang = None;
    let mut is_literal = false;

    let fail = |state, message, offset: usize| TupleError {
        state,
        message,
        offset,
        remainder: line.substring_from(offset.min(line.len())),
    };

    for i in 0..=bytes.len() {
        let b = bytes.get(i).copied().unwrap_or(b' ');
        state = match (state, b) {
            (ParseState::Start, b'<') => {
                mark = i + 1;
                ParseState::Subject
            }
            (ParseState::Start, b) if b.is_ascii_whitespace() => ParseState::Start,
            (ParseState::Start, _) => return Err(fail(state, "expected '<' to open subject", i)),

            (ParseState::Subject, b'>') => {
                subject = Some(line.substring(mark, i));
                ParseState::SubjectEnd
            }
            (ParseState::Subject, _) => ParseState::Subject,

            (ParseState::SubjectEnd, b'<') => {
                mark = i + 1;
                ParseState::Predicate
            }
            (ParseState::SubjectEnd, b) if b.is_ascii_whitespace() => ParseState::SubjectEnd,
            (ParseState::SubjectEnd, _) => {
                return Err(fail(state, "expected '<' to open predicate", i))
            }

            (ParseState::Predicate, b'>') => {
                predicate = Some(line.substring(mark, i));
                ParseState::PredicateEnd
            }
            (ParseState::Predicate, _) => ParseState::Predicate,

            (ParseState::PredicateEnd, b'<') => {
                mark = i + 1;
                ParseState::Object
            }
            (ParseState::PredicateEnd, b'"') => {
                mark = i + 1;
                is_literal = true;
                ParseState::ObjectText
            }
            (ParseState::PredicateEnd, b) if b.is_ascii_whitespace() => ParseState::PredicateEnd,
            (ParseState::PredicateEnd, _) => {
                return Err(fail(state, "expected '<' or '\"' to open object", i))
            }

            (ParseState::Object, b'>') => {
                object = Some(line.substring(mark, i));
                ParseState::SkipRest
            }
            (ParseState::Object, _) => ParseState::Object,

            (ParseState::ObjectText, b'\\') => ParseState::ObjectTextQuote,
            (ParseState::ObjectText, b'"') => {
                object = Some(line.substring(mark, i));
                ParseState::ObjectTextEnd
            }
            (ParseState::ObjectText, _) => ParseState::ObjectText,

            (ParseState::ObjectTextQuote, _) => ParseState::ObjectText,

            (ParseState::ObjectTextEnd, b'@') => {
                mark = i + 1;
                ParseState::ObjectTextLang
            }
            (ParseState::ObjectTextEnd, b'^') => ParseState::SkipRest,
            (ParseState::ObjectTextEnd, b) if b.is_ascii_whitespace() => ParseState::SkipRest,
            (ParseState::ObjectTextEnd, _) => {
                return Err(fail(state, "unexpected byte after closing quote", i))
            }

            (ParseState::ObjectTextLang, b) if b.is_ascii_whitespace() => {
                lang = Some(line.substring(mark, i));
                ParseState::SkipRest
            }
            (ParseState::ObjectTextLang, _) => ParseState::ObjectTextLang,

            (ParseState::SkipRest, _) => ParseState::SkipRest,
        };
    }

    match (state, subject, predicate, object) {
        (ParseState::SkipRest, Some(subject), Some(predicate), Some(object)) => Ok(RdfTuple {
            subject,
            predicate,
            object,
            lang,
            is_literal,
        }),
        (state, ..) => Err(fail(
            state,
            "line ended before the tuple was complete",
            bytes.len(),
        )),
    }
}

/// Streams tuples from a dump, skipping blank lines, `#` comments and lines
/// that fail to parse.
pub struct TupleReader<R> {
    lines: LineReader<R>,
    skipped: u64,
}

impl TupleReader<Box<dyn Read + Send>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(open_read(path)?))
    }
}

impl<R: Read> TupleReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: LineReader::new(reader),
            skipped: 0,
        }
    }

    /// Lines that did not parse so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn lines_read(&self) -> u64 {
        self.lines.lines_read()
    }
}

impl<R: Read> Iterator for TupleReader<R> {
    type Item = Result<RdfTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next_line() {
                Ok(Some(line)) => line.trim(),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            match parse_tuple(&line) {
                Ok(tuple) => return Some(Ok(tuple)),
                Err(e) => {
                    self.skipped += 1;
                    debug!(line = self.lines.lines_read(), error = %e, "Skipping malformed tuple");
                }
            }
        }
    }
}
