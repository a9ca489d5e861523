//! Memory ledger
//!
//! One running total per logical query, shared by every buffering
//! iterator through an `Arc`. A charge that would push the total past the
//! limit is refused and leaves the total unchanged.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::errors::{QueryError, QueryResult};
use crate::observability::Event;

#[derive(Debug)]
pub struct MemoryLedger {
    used: AtomicU64,
    limit: AtomicU64,
}

impl MemoryLedger {
    pub fn new(limit: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            limit: AtomicU64::new(limit),
        }
    }

    /// Adds `bytes` to the total, or fails with `MemoryExceeded`
    pub fn charge(&self, bytes: u64) -> QueryResult<()> {
        let limit = self.limit.load(Ordering::Relaxed);
        let result = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            });
        match result {
            Ok(_) => Ok(()),
            Err(used) => {
                warn!(
                    event = Event::MemoryExceeded.as_str(),
                    used,
                    requested = bytes,
                    limit,
                    "memory budget exhausted"
                );
                Err(QueryError::MemoryExceeded {
                    used: used.saturating_add(bytes),
                    limit,
                })
            }
        }
    }

    /// Removes `bytes` from the total
    pub fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
    }
}
