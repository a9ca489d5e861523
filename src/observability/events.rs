//! Query lifecycle events
//!
//! Events are explicit and typed. They are emitted through `tracing` with
//! the event name in the `event` field, so any subscriber can filter on
//! them.

use std::fmt;

/// Observable events of the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Query lifecycle
    /// First call of a logical query
    QueryStart,
    /// A call returned rows and a continuation
    QuerySuspended,
    /// The query was drained
    QueryComplete,
    /// The caller released the query early
    QueryAbandoned,
    /// A call failed
    QueryFailed,

    // Fetches
    /// A fetch was sent to the collaborator
    FetchIssued,
    /// The collaborator returned an error
    FetchFailed,
    /// The in-flight fetch was cancelled
    FetchCancelled,

    // Distributed merge
    /// Sort phase 1 discovered every partition
    SortPhase1Complete,
    /// A server-issued virtual scan joined the merge
    VirtualScanSeeded,
    /// A row was dropped because its primary key was already returned
    DuplicateDropped,

    // Resources
    /// A charge did not fit in the memory budget
    MemoryExceeded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::QueryStart => "QUERY_BEGIN",
            Event::QuerySuspended => "QUERY_SUSPENDED",
            Event::QueryComplete => "QUERY_COMPLETE",
            Event::QueryAbandoned => "QUERY_ABANDONED",
            Event::QueryFailed => "QUERY_FAILED",

            Event::FetchIssued => "FETCH_ISSUED",
            Event::FetchFailed => "FETCH_FAILED",
            Event::FetchCancelled => "FETCH_CANCELLED",

            Event::SortPhase1Complete => "SORT_PHASE1_COMPLETE",
            Event::VirtualScanSeeded => "VIRTUAL_SCAN_SEEDED",
            Event::DuplicateDropped => "DUPLICATE_DROPPED",

            Event::MemoryExceeded => "MEMORY_EXCEEDED",
        }
    }

    /// Returns true if this event ends the query for good
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::MemoryExceeded)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
