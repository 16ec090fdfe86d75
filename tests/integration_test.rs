//! Integration tests for byte-lib over small dump fixtures.
//!
//! Fixtures are written BZ2- or gzip-compressed the way real Wikipedia and
//! DBpedia dumps are distributed, and flow through the public API only:
//!
//! - **Sort** -- unsorted pageview dump to a sorted, recompressed file
//! - **Join** -- two sorted pageview days merged on `project title`
//! - **Index** -- file multimap built, persisted, reopened from disk
//! - **Tuples** -- DBpedia labels parsed, with malformed lines skipped
//! - **Dedup** -- bloom and exact filters over a redirect list

use bzip2::write::BzEncoder;
use bzip2::Compression;
use byte_lib::bytestring::ByteString;
use byte_lib::chunk_map::{ChunkMap, ChunkMultiMap};
use byte_lib::extract::{Fields, Whole};
use byte_lib::file_map::FileMultiMap;
use byte_lib::filter::{BloomFilter, MemTable};
use byte_lib::io::{read_all, read_lines};
use byte_lib::line_reader::LineReader;
use byte_lib::merge::{join_files, merge_join};
use byte_lib::sort::sort_file;
use byte_lib::tuple::{parse_tuple, TupleReader};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};

/// Helper: BZ2-compress `text` into a temp file ending in `suffix`.
fn create_bz2(text: &str, suffix: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn write_plain(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

/// Hourly pageview lines: `project title views bytes`.
fn pageviews_day1() -> &'static str {
    "en Paris 120 0\n\
     de Berlin 300 0\n\
     en Berlin 410 0\n\
     fr Paris 95 0\n\
     en Main_Page 9000 0\n"
}

fn pageviews_day2() -> &'static str {
    "de Berlin 280 0\n\
     en Berlin 390 0\n\
     en Rome 50 0\n"
}

fn dbpedia_labels() -> &'static str {
    "# started 2024-01-01T00:00:00Z\n\
     <http://dbpedia.org/resource/Berlin> <http://www.w3.org/2000/01/rdf-schema#label> \"Berlin\"@en <http://en.wikipedia.org/wiki/Berlin> .\n\
     <http://dbpedia.org/resource/Paris> <http://www.w3.org/2000/01/rdf-schema#label> \"Paris\"@en .\n\
     <http://dbpedia.org/resource/Rome> <http://www.w3.org/2000/01/rdf-schema#label> \"Rom\n\
     <http://dbpedia.org/resource/Berlin> <http://dbpedia.org/ontology/populationTotal> \"3645000\"^^<http://www.w3.org/2001/XMLSchema#integer> .\n\
     # completed\n"
}

// ============================================================================
// Sort
// ============================================================================

#[test]
fn test_sort_compressed_dump() {
    let input = create_bz2(pageviews_day1(), ".txt.bz2");
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("sorted.txt.gz");

    assert_eq!(sort_file(input.path(), &output).unwrap(), 5);

    let lines: Vec<String> = read_lines(&output)
        .unwrap()
        .iter()
        .map(|l| l.to_string())
        .collect();
    let mut expected: Vec<String> = pageviews_day1().lines().map(String::from).collect();
    expected.sort();
    assert_eq!(lines, expected);
}

// ============================================================================
// Join
// ============================================================================

fn sorted_copy(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let unsorted = write_plain(dir, &format!("{}.raw", name), text);
    let sorted = dir.path().join(name);
    sort_file(&unsorted, &sorted).unwrap();
    sorted
}

#[test]
fn test_join_two_sorted_days() {
    let dir = TempDir::new().unwrap();
    let day1 = sorted_copy(&dir, "day1.txt", pageviews_day1());
    let day2 = sorted_copy(&dir, "day2.txt.bz2", pageviews_day2());
    let output = dir.path().join("joined.txt");

    let groups = join_files(&[&day1, &day2], &Fields::first_two(b" "), &output).unwrap();
    assert_eq!(groups, 2);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "de Berlin 300 0 280 0\nen Berlin 410 0 390 0\n"
    );
}

#[test]
fn test_merge_sums_views_across_days() {
    let dir = TempDir::new().unwrap();
    let day1 = sorted_copy(&dir, "day1.txt", pageviews_day1());
    let day2 = sorted_copy(&dir, "day2.txt", pageviews_day2());

    let key = |r: &ByteString| r.fields(b" ", 0, 2);
    let by_key = |a: &ByteString, b: &ByteString| key(a).cmp(&key(b));
    let mut streams = vec![
        LineReader::open(&day1).unwrap(),
        LineReader::open(&day2).unwrap(),
    ];
    let mut totals = Vec::new();
    merge_join(&mut streams, by_key, by_key, |group| {
        let mut views = 0;
        for record in group {
            views += record.field(b" ", 2).to_long()?;
        }
        totals.push((key(&group[0]).to_string(), views));
        Ok(())
    })
    .unwrap();

    assert_eq!(
        totals,
        vec![("de Berlin".to_string(), 580), ("en Berlin".to_string(), 800)]
    );
}

// ============================================================================
// Index
// ============================================================================

#[test]
fn test_file_multimap_persists_and_reopens() {
    let dir = TempDir::new().unwrap();
    let path = write_plain(&dir, "pageviews.txt", pageviews_day1());

    let first = FileMultiMap::open(&path, b"\n", Fields::range(b" ", 1, 2), Whole).unwrap();
    assert!(first.is_resident());
    assert!(first.index_path().exists());
    assert_eq!(first.get(b"Paris").unwrap().len(), 2);

    let second = FileMultiMap::open(&path, b"\n", Fields::range(b" ", 1, 2), Whole).unwrap();
    assert!(!second.is_resident());
    let berlin = second.get(b"Berlin").unwrap();
    assert_eq!(berlin, vec!["de Berlin 300 0", "en Berlin 410 0"]);
    assert!(second.get(b"Madrid").unwrap().is_empty());
}

#[test]
fn test_file_multimap_over_bz2() {
    let input = create_bz2(pageviews_day1(), ".txt.bz2");
    let title = Fields::range(b" ", 1, 2);
    let map = FileMultiMap::open(input.path(), b"\n", Fields::first(b" "), title).unwrap();
    assert_eq!(map.key_count(), 3);
    assert_eq!(map.get(b"en").unwrap(), vec!["Paris", "Berlin", "Main_Page"]);
    fs::remove_file(map.index_path()).unwrap();
}

#[test]
fn test_chunk_maps_share_loaded_buffer() {
    let input = create_bz2(pageviews_day1(), ".txt.bz2");
    let chunk = read_all(input.path()).unwrap().into_view();

    let title = Fields::range(b" ", 1, 2);
    let latest = ChunkMap::build(chunk.clone(), b"\n", Fields::first(b" "), title);
    assert_eq!(latest.get(b"en").unwrap(), "Main_Page");
    assert!(latest.get(b"en").unwrap().shares_storage_with(&chunk));

    let all = ChunkMultiMap::build(chunk, b"\n", Fields::first(b" "), Whole);
    assert_eq!(all.get(b"fr"), vec!["fr Paris 95 0"]);
    assert_eq!(all.len(), 5);
}

// ============================================================================
// Tuples
// ============================================================================

#[test]
fn test_tuple_reader_over_bz2_dump() {
    let input = create_bz2(dbpedia_labels(), ".nt.bz2");
    let mut reader = TupleReader::open(input.path()).unwrap();
    let tuples: Vec<_> = reader.by_ref().map(|t| t.unwrap()).collect();

    assert_eq!(tuples.len(), 3);
    assert_eq!(reader.skipped(), 1);
    assert_eq!(*tuples[0].object(), "Berlin");
    assert_eq!(*tuples[0].lang().unwrap(), "en");
    assert_eq!(tuples[2].object().to_long().unwrap(), 3_645_000);
}

#[test]
fn test_tuple_parse_error_is_structured() {
    let line = ByteString::from("<http://dbpedia.org/resource/Rome> <p> \"Rom");
    let err = parse_tuple(&line).unwrap_err();
    assert!(err.to_string().contains("ObjectText"));
}

// ============================================================================
// Dedup
// ============================================================================

fn redirects() -> Vec<&'static str> {
    vec!["Berlin", "Paris", "Berlin", "Rome", "Paris", "Vienna"]
}

#[test]
fn test_bloom_and_exact_filters_agree_on_small_input() {
    let mut bloom = BloomFilter::new(16, 16);
    let mut exact = MemTable::with_expected(4);
    for title in redirects() {
        assert_eq!(bloom.add(title.as_bytes()), exact.add(title.as_bytes()), "{}", title);
    }
    assert_eq!(exact.len(), 4);
}

#[test]
fn test_line_reader_counts_dump_lines() {
    let input = create_bz2(&redirects().join("\n"), ".txt.bz2");
    let lines: Vec<ByteString> = LineReader::open(input.path())
        .unwrap()
        .map(|l| l.unwrap())
        .collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[5], "Vienna");
}
