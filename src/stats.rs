use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected while loading a dump
#[derive(Default)]
pub struct LoadStats {
    pub lines_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub tuples_parsed: AtomicU64,
    pub parse_errors: AtomicU64,
    pub duplicates_skipped: AtomicU64,
}

/// Point-in-time copy of [`LoadStats`], for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub lines_read: u64,
    pub bytes_read: u64,
    pub tuples_parsed: u64,
    pub parse_errors: u64,
    pub duplicates_skipped: u64,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one line of `len` bytes, not including its terminator.
    pub fn add_line(&self, len: usize) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64 + 1, Ordering::Relaxed);
    }

    pub fn inc_tuples(&self) {
        self.tuples_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_parse_errors(&self, count: u64) {
        self.parse_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn tuples(&self) -> u64 {
        self.tuples_parsed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            lines_read: self.lines(),
            bytes_read: self.bytes(),
            tuples_parsed: self.tuples(),
            parse_errors: self.errors(),
            duplicates_skipped: self.duplicates(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn default_values_are_zero() {
        assert_eq!(LoadStats::new().summary(), LoadSummary::default());
    }

    #[test]
    fn add_line_counts_terminator() {
        let stats = LoadStats::new();
        stats.add_line(5);
        stats.add_line(0);
        assert_eq!(stats.lines(), 2);
        assert_eq!(stats.bytes(), 7);
    }

    #[test]
    fn summary_captures_state() {
        let stats = LoadStats::new();
        stats.inc_tuples();
        stats.inc_tuples();
        stats.add_parse_errors(3);
        stats.inc_duplicates();

        let summary = stats.summary();
        assert_eq!(summary.tuples_parsed, 2);
        assert_eq!(summary.parse_errors, 3);
        assert_eq!(summary.duplicates_skipped, 1);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let stats = Arc::new(LoadStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.inc_tuples();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.tuples(), 400);
    }

    #[test]
    fn summary_serializes() {
        let stats = LoadStats::new();
        stats.add_line(9);
        let json = serde_json::to_string(&stats.summary()).unwrap();
        assert!(json.contains("\"lines_read\":1"));
        assert!(json.contains("\"bytes_read\":10"));
    }
}
