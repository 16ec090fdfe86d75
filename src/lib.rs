//! byte-lib: zero-copy byte strings for Wikipedia pageview and DBpedia dumps
//!
//! Multi-gigabyte dumps are loaded into large shared buffers and processed
//! through immutable views instead of per-record strings. Field extraction,
//! hashing, comparison and joining all run directly on byte ranges of the
//! loaded data.
//!
//! # Architecture
//!
//! - **Shared storage** -- [`buffer::Buffer`] owns heap or raw big storage
//!   behind an `Arc`; [`bytestring::ByteString`] views clone in O(1)
//! - **Packed indices** -- one `i64` per record range ([`packed`]), so tables
//!   and sort arrays hold 8 bytes instead of copies
//! - **Open addressing** -- quadratic probing `(hash + n²) & mask` in every
//!   table, with explicit empty slots instead of sentinel values
//! - **Persisted indexes** -- multimap bucket tables saved beside their
//!   source as `<file>.idx.snappy` and reused on the next open
//! - **Single-writer builds** -- structures are built once and then shared
//!   read-only
//!
//! # Key Modules
//!
//! - [`bytestring`] -- Immutable views with split, search and number parsing
//! - [`buffer`] -- Positioned buffers and the big-allocation retry ladder
//! - [`hashmap`] -- `OpenMap` keyed by byte strings
//! - [`chunk_map`] -- Maps and multimaps over one chunk of records
//! - [`file_map`] -- Multimap backed by a file and its persisted index
//! - [`filter`] -- Bloom filter and exact-hash dedup table
//! - [`merge`] -- Streaming k-way merge-join of sorted sources
//! - [`sort`] -- Index-based sort of line files
//! - [`tuple`] -- RDF tuple parser for DBpedia dumps
//! - [`io`] -- Whole-file loads, line and map persistence, compression by suffix
//! - [`config`] -- Buffer sizes and table constants
//!
//! # Example Usage
//!
//! ```bash
//! # Sort a pageview dump, then join two sorted days on the first two fields
//! byte-lib sort -i pageviews-20240101.gz -o day1.sorted.gz
//! byte-lib join -i day1.sorted.gz -i day2.sorted.gz -o both.txt --key-fields 2
//!
//! # Index a link file once, then look keys up without reloading it
//! byte-lib index -i links.txt
//! byte-lib lookup -i links.txt Berlin Paris
//! ```

pub mod buffer;
pub mod builder;
pub mod bytestring;
pub mod cache;
pub mod chunk_map;
pub mod config;
pub mod error;
pub mod extract;
pub mod file_map;
pub mod filter;
pub mod hash;
pub mod hashmap;
pub mod io;
pub mod line_reader;
pub mod merge;
pub mod packed;
pub mod sort;
pub mod stats;
pub mod tuple;

pub use bytestring::ByteString;
pub use error::{AllocError, NumberError, TupleError};
