//! Query engine counters
//!
//! - Counters only, monotonic
//! - Shared by every query of one driver
//! - Relaxed atomics; exact once all calls have returned

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one driver instance
#[derive(Debug, Default)]
pub struct QueryMetrics {
    /// Top-level `execute` calls
    calls: AtomicU64,
    /// Fetches sent to the collaborator
    fetches: AtomicU64,
    /// Fetches that returned an error or were cancelled
    fetch_failures: AtomicU64,
    /// Rows handed back to callers
    rows_returned: AtomicU64,
    /// Rows dropped by duplicate elimination
    duplicates_dropped: AtomicU64,
    /// Queries drained to the end
    queries_completed: AtomicU64,
    /// Queries released before the end
    queries_abandoned: AtomicU64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_calls(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetches(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows_returned(&self, rows: u64) {
        self.rows_returned.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn increment_duplicates_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_completed(&self) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_abandoned(&self) {
        self.queries_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as JSON
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"calls":{},"fetches":{},"fetch_failures":{},"rows_returned":{},"duplicates_dropped":{},"queries_completed":{},"queries_abandoned":{}}}"#,
            self.calls.load(Ordering::Relaxed),
            self.fetches.load(Ordering::Relaxed),
            self.fetch_failures.load(Ordering::Relaxed),
            self.rows_returned.load(Ordering::Relaxed),
            self.duplicates_dropped.load(Ordering::Relaxed),
            self.queries_completed.load(Ordering::Relaxed),
            self.queries_abandoned.load(Ordering::Relaxed),
        )
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            queries_abandoned: self.queries_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub rows_returned: u64,
    pub duplicates_dropped: u64,
    pub queries_completed: u64,
    pub queries_abandoned: u64,
}
