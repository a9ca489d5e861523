//! Receive / distributed-merge engine
//!
//! The only iterator that talks to the fetch collaborator. It coordinates
//! per-shard and per-partition scans, discovers partitions for sorted
//! all-partitions scans (sort phase 1), merges sorted streams and drops
//! cross-shard duplicates.

mod dedup;
mod engine;
mod partial;

pub use dedup::DuplicateSet;
pub use engine::ReceiveIter;
pub use partial::PartialResult;
