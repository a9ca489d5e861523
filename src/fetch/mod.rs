//! Fetch collaborator interface
//!
//! The transport layer performs the actual network round trips. The engine
//! only describes what it needs next (`FetchRequest`) and consumes the
//! decoded answer (`Batch`). Only the Receive engine calls `Fetcher::fetch`,
//! and it does so at most once per top-level call.

mod errors;
pub mod memory;

pub use errors::{FetchError, FetchResult};
pub use memory::InMemoryCluster;

use std::future::Future;
use std::ops::AddAssign;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::value::Value;

pub type ShardId = i32;
pub type PartitionId = i32;

/// Resources consumed by server-side work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedCapacity {
    pub read_units: u64,
    pub read_kb: u64,
    pub write_units: u64,
}

impl ConsumedCapacity {
    pub fn new(read_units: u64, read_kb: u64, write_units: u64) -> Self {
        Self {
            read_units,
            read_kb,
            write_units,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for ConsumedCapacity {
    fn add_assign(&mut self, other: Self) {
        self.read_units += other.read_units;
        self.read_kb += other.read_kb;
        self.write_units += other.write_units;
    }
}

/// Where a fetch should be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchTarget {
    /// Let the server route (single partition and unsorted scans)
    Any,
    /// Sort phase 1 of an all-partitions scan
    SortPhase1,
    Shard(ShardId),
    Partition(PartitionId),
}

/// Server-issued sub-range of a shard scan.
///
/// The resume keys are opaque to the engine; they are sent back unchanged
/// with the first fetch of the partial result seeded from this descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualScan {
    pub shard_id: ShardId,
    pub partition_id: PartitionId,
    #[serde(default)]
    pub primary_resume_key: Vec<u8>,
    #[serde(default)]
    pub secondary_resume_key: Vec<u8>,
    #[serde(default)]
    pub move_after: bool,
}

/// A request for the next batch of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Per-source continuation returned by the previous batch
    pub continuation: Option<Vec<u8>>,
    /// Maximum number of rows to return
    pub limit: u32,
    pub target: FetchTarget,
    pub virtual_scan: Option<VirtualScan>,
}

/// Per-partition metadata returned during sort phase 1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPhase1Info {
    /// False once every partition has been discovered
    pub in_phase1: bool,
    pub partition_ids: Vec<PartitionId>,
    /// Number of rows in `Batch::rows` belonging to each partition, in order
    pub result_counts: Vec<i32>,
    /// Continuation for each partition; `None` when the partition is exhausted
    pub continuation_keys: Vec<Option<Vec<u8>>>,
}

/// A decoded result batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub rows: Vec<Value>,
    /// Continuation for the scan that produced this batch (the phase-1
    /// continuation during sort phase 1); `None` when it is exhausted
    pub continuation: Option<Vec<u8>>,
    pub consumed: ConsumedCapacity,
    #[serde(default)]
    pub phase1: Option<SortPhase1Info>,
    #[serde(default)]
    pub virtual_scans: Vec<VirtualScan>,
}

/// Future returned by a fetch
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = FetchResult<Batch>> + Send + 'a>>;

/// Performs network round trips on behalf of the Receive engine
pub trait Fetcher: Send + Sync {
    /// Fetch the next batch described by `request`
    fn fetch(&self, request: FetchRequest) -> FetchFuture<'_>;
}
