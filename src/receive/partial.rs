//! Partial results
//!
//! Unconsumed rows of one shard, one partition or one virtual scan, plus
//! the continuation needed to fetch more of them. Partial results are
//! ordered for the merge heap:
//!
//! 1. a result with no buffered row sorts before every result with rows,
//!    so the merge fetches more of it before yielding anything
//! 2. otherwise by the first buffered row, per the sort keys
//! 3. ties by source id

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::errors::QueryResult;
use crate::fetch::{FetchRequest, FetchTarget, VirtualScan};
use crate::runtime::MemoryLedger;
use crate::value::{RowComparator, Value};

#[derive(Debug, Clone)]
pub struct PartialResult {
    id: i32,
    target: FetchTarget,
    rows: VecDeque<(Value, u64)>,
    continuation: Option<Vec<u8>>,
    started: bool,
    virtual_scan: Option<VirtualScan>,
    /// Bytes charged for the buffered rows
    memory: u64,
    comparator: RowComparator,
}

impl PartialResult {
    /// A source nothing has been fetched from yet
    pub fn unstarted(id: i32, target: FetchTarget, comparator: RowComparator) -> Self {
        Self {
            id,
            target,
            rows: VecDeque::new(),
            continuation: None,
            started: false,
            virtual_scan: None,
            memory: 0,
            comparator,
        }
    }

    /// A virtual scan issued by the server; its descriptor travels with the
    /// first fetch
    pub fn virtual_scan(id: i32, scan: VirtualScan, comparator: RowComparator) -> Self {
        let mut partial = Self::unstarted(id, FetchTarget::Shard(scan.shard_id), comparator);
        partial.virtual_scan = Some(scan);
        partial
    }

    /// A partition discovered during sort phase 1, with rows already
    /// charged to the ledger
    pub fn discovered(
        id: i32,
        rows: Vec<(Value, u64)>,
        continuation: Option<Vec<u8>>,
        comparator: RowComparator,
    ) -> Self {
        let memory = rows.iter().map(|(_, size)| size).sum();
        Self {
            id,
            target: FetchTarget::Partition(id),
            rows: rows.into(),
            continuation,
            started: true,
            virtual_scan: None,
            memory,
            comparator,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Whether the server may still hold rows for this source
    pub fn has_remote(&self) -> bool {
        !self.started || self.continuation.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.has_rows() && !self.has_remote()
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }

    /// Request for the next batch of this source
    pub fn next_request(&self, limit: u32) -> FetchRequest {
        FetchRequest {
            continuation: self.continuation.clone(),
            limit,
            target: self.target,
            virtual_scan: if self.started {
                None
            } else {
                self.virtual_scan.clone()
            },
        }
    }

    /// Buffers a fetched batch and returns the rows and bytes added. The
    /// whole batch is charged at once, so a refused charge leaves both the
    /// ledger and this result untouched.
    pub fn stage(
        &mut self,
        rows: Vec<Value>,
        continuation: Option<Vec<u8>>,
        ledger: &MemoryLedger,
    ) -> QueryResult<(u64, u64)> {
        let sized: Vec<(Value, u64)> = rows
            .into_iter()
            .map(|row| {
                let size = row.size_in_bytes();
                (row, size)
            })
            .collect();
        let total: u64 = sized.iter().map(|(_, size)| size).sum();
        ledger.charge(total)?;
        let added = sized.len() as u64;
        self.memory += total;
        self.rows.extend(sized);
        self.continuation = continuation;
        self.started = true;
        Ok((added, total))
    }

    /// Takes the first buffered row, releasing its charge
    pub fn pop_row(&mut self, ledger: &MemoryLedger) -> Option<Value> {
        let (row, size) = self.rows.pop_front()?;
        ledger.release(size);
        self.memory = self.memory.saturating_sub(size);
        Some(row)
    }

    /// Drops every buffered row, releasing their charges
    pub fn release(&mut self, ledger: &MemoryLedger) {
        ledger.release(self.memory);
        self.memory = 0;
        self.rows.clear();
    }
}

impl PartialEq for PartialResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PartialResult {}

impl PartialOrd for PartialResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartialResult {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.rows.front(), other.rows.front()) {
            (None, None) => self.id.cmp(&other.id),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((a, _)), Some((b, _))) => self
                .comparator
                .compare(a, b)
                .then(self.id.cmp(&other.id)),
        }
    }
}
