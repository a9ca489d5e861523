//! In-process cluster implementing `Fetcher`
//!
//! Holds partitions (each owned by a shard) in memory and answers fetches
//! the way a store would: sorted per-partition and per-shard scans,
//! sort phase 1 discovery, virtual-scan splitting of shard scans and
//! offset-based continuations. Failures can be injected to exercise the
//! retry paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::SortSpec;
use crate::value::{RowComparator, Value};

use super::{
    Batch, ConsumedCapacity, FetchError, FetchFuture, FetchRequest, FetchResult, FetchTarget,
    Fetcher, PartitionId, ShardId, SortPhase1Info, VirtualScan,
};

/// Position inside one scan, carried in continuation bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ScanCursor {
    /// Virtual-scan subset of a shard scan (0 for the base scan)
    subset: u32,
    offset: usize,
}

impl ScanCursor {
    fn encode(&self) -> Vec<u8> {
        // serializing two integers cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    fn decode(bytes: &[u8]) -> FetchResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FetchError::Transport(format!("malformed continuation: {}", e)))
    }
}

#[derive(Debug, Clone)]
struct Partition {
    shard: ShardId,
    rows: Vec<Value>,
}

/// In-memory cluster for tests and embedders
pub struct InMemoryCluster {
    partitions: BTreeMap<PartitionId, Partition>,
    sort_specs: Vec<SortSpec>,
    phase1_partitions_per_batch: usize,
    virtual_scan_splits: HashMap<ShardId, u32>,
    latency: Option<Duration>,
    fetch_count: AtomicU64,
    injected: Mutex<VecDeque<FetchError>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            partitions: BTreeMap::new(),
            sort_specs: Vec::new(),
            phase1_partitions_per_batch: 2,
            virtual_scan_splits: HashMap::new(),
            latency: None,
            fetch_count: AtomicU64::new(0),
            injected: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Adds a partition owned by `shard`
    pub fn with_partition(mut self, id: PartitionId, shard: ShardId, rows: Vec<Value>) -> Self {
        self.partitions.insert(id, Partition { shard, rows });
        self
    }

    /// Order in which partition and shard scans return rows
    pub fn with_sort(mut self, specs: Vec<SortSpec>) -> Self {
        self.sort_specs = specs;
        self
    }

    /// Number of partitions discovered by each sort phase 1 batch
    pub fn with_phase1_batch_partitions(mut self, count: usize) -> Self {
        self.phase1_partitions_per_batch = count.max(1);
        self
    }

    /// Splits the scan of `shard` into `ways` interleaved sub-scans; the
    /// first fetch of the shard returns descriptors for all but the first
    pub fn with_virtual_scans(mut self, shard: ShardId, ways: u32) -> Self {
        self.virtual_scan_splits.insert(shard, ways.max(1));
        self
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next fetch fail with `error` (queued, one per call)
    pub fn fail_next(&self, error: FetchError) {
        if let Ok(mut queue) = self.injected.lock() {
            queue.push_back(error);
        }
    }

    /// Number of fetch calls received, failed ones included
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Distinct shard ids, ascending
    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.partitions.values().map(|p| p.shard).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn sorted(&self, mut rows: Vec<Value>) -> Vec<Value> {
        if !self.sort_specs.is_empty() {
            let comparator = RowComparator::new(self.sort_specs.clone());
            rows.sort_by(|a, b| comparator.compare(a, b));
        }
        rows
    }

    fn partition_rows(&self, id: PartitionId) -> FetchResult<Vec<Value>> {
        let partition = self
            .partitions
            .get(&id)
            .ok_or_else(|| FetchError::Transport(format!("unknown partition {}", id)))?;
        Ok(self.sorted(partition.rows.clone()))
    }

    fn shard_rows(&self, shard: ShardId) -> FetchResult<Vec<Value>> {
        let rows: Vec<Value> = self
            .partitions
            .values()
            .filter(|p| p.shard == shard)
            .flat_map(|p| p.rows.iter().cloned())
            .collect();
        if rows.is_empty() && !self.partitions.values().any(|p| p.shard == shard) {
            return Err(FetchError::Transport(format!("unknown shard {}", shard)));
        }
        Ok(self.sorted(rows))
    }

    fn answer(&self, request: &FetchRequest) -> FetchResult<Batch> {
        let limit = request.limit.max(1) as usize;
        match request.target {
            FetchTarget::Any => {
                let rows: Vec<Value> = self
                    .partitions
                    .values()
                    .flat_map(|p| p.rows.iter().cloned())
                    .collect();
                let cursor = decode_cursor(&request.continuation)?;
                Ok(page(rows, cursor, limit))
            }
            FetchTarget::Partition(id) => {
                let cursor = decode_cursor(&request.continuation)?;
                Ok(page(self.partition_rows(id)?, cursor, limit))
            }
            FetchTarget::Shard(shard) => self.answer_shard(shard, request, limit),
            FetchTarget::SortPhase1 => self.answer_phase1(request, limit),
        }
    }

    fn answer_shard(
        &self,
        shard: ShardId,
        request: &FetchRequest,
        limit: usize,
    ) -> FetchResult<Batch> {
        let ways = self.virtual_scan_splits.get(&shard).copied().unwrap_or(1);
        let cursor = match (&request.continuation, &request.virtual_scan) {
            (Some(bytes), _) => ScanCursor::decode(bytes)?,
            (None, Some(scan)) => ScanCursor {
                subset: decode_subset(&scan.primary_resume_key)?,
                offset: 0,
            },
            (None, None) => ScanCursor {
                subset: 0,
                offset: 0,
            },
        };
        if cursor.subset >= ways {
            return Err(FetchError::Transport(format!(
                "virtual scan {} out of range for shard {}",
                cursor.subset, shard
            )));
        }

        let rows: Vec<Value> = self
            .shard_rows(shard)?
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i as u32 % ways == cursor.subset)
            .map(|(_, row)| row)
            .collect();
        let mut batch = page(rows, cursor, limit);

        // descriptors are issued once, with the first page of the base scan
        if ways > 1 && request.continuation.is_none() && request.virtual_scan.is_none() {
            let partition_id = self
                .partitions
                .iter()
                .find(|(_, p)| p.shard == shard)
                .map(|(id, _)| *id)
                .unwrap_or_default();
            batch.virtual_scans = (1..ways)
                .map(|subset| VirtualScan {
                    shard_id: shard,
                    partition_id,
                    primary_resume_key: subset.to_be_bytes().to_vec(),
                    secondary_resume_key: Vec::new(),
                    move_after: true,
                })
                .collect();
        }
        Ok(batch)
    }

    fn answer_phase1(&self, request: &FetchRequest, limit: usize) -> FetchResult<Batch> {
        let start = decode_cursor(&request.continuation)?.offset;
        let ids: Vec<PartitionId> = self.partitions.keys().copied().collect();
        let end = (start + self.phase1_partitions_per_batch).min(ids.len());
        let discovered = ids.get(start..end).unwrap_or_default();
        let per_partition = (limit / discovered.len().max(1)).max(1);

        let mut rows = Vec::new();
        let mut info = SortPhase1Info {
            in_phase1: end < ids.len(),
            ..SortPhase1Info::default()
        };
        for id in discovered {
            let all = self.partition_rows(*id)?;
            let taken = all.len().min(per_partition);
            info.partition_ids.push(*id);
            info.result_counts.push(taken as i32);
            info.continuation_keys.push((taken < all.len()).then(|| {
                ScanCursor {
                    subset: 0,
                    offset: taken,
                }
                .encode()
            }));
            rows.extend(all.into_iter().take(taken));
        }

        let continuation = info.in_phase1.then(|| {
            ScanCursor {
                subset: 0,
                offset: end,
            }
            .encode()
        });
        Ok(Batch {
            consumed: consumed_for(&rows),
            rows,
            continuation,
            phase1: Some(info),
            virtual_scans: Vec::new(),
        })
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for InMemoryCluster {
    fn fetch(&self, request: FetchRequest) -> FetchFuture<'_> {
        Box::pin(async move {
            self.fetch_count.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut log) = self.requests.lock() {
                log.push(request.clone());
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            let injected = self
                .injected
                .lock()
                .map_err(|e| FetchError::Transport(e.to_string()))?
                .pop_front();
            if let Some(error) = injected {
                return Err(error);
            }
            self.answer(&request)
        })
    }
}

fn decode_cursor(continuation: &Option<Vec<u8>>) -> FetchResult<ScanCursor> {
    match continuation {
        Some(bytes) => ScanCursor::decode(bytes),
        None => Ok(ScanCursor {
            subset: 0,
            offset: 0,
        }),
    }
}

fn decode_subset(key: &[u8]) -> FetchResult<u32> {
    let bytes: [u8; 4] = key
        .try_into()
        .map_err(|_| FetchError::Transport("malformed virtual scan resume key".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

fn page(rows: Vec<Value>, cursor: ScanCursor, limit: usize) -> Batch {
    let end = (cursor.offset + limit).min(rows.len());
    let page: Vec<Value> = rows
        .get(cursor.offset..end)
        .map(|slice| slice.to_vec())
        .unwrap_or_default();
    let continuation = (end < rows.len()).then(|| {
        ScanCursor {
            subset: cursor.subset,
            offset: end,
        }
        .encode()
    });
    Batch {
        consumed: consumed_for(&page),
        rows: page,
        continuation,
        phase1: None,
        virtual_scans: Vec::new(),
    }
}

fn consumed_for(rows: &[Value]) -> ConsumedCapacity {
    let bytes: u64 = rows.iter().map(Value::size_in_bytes).sum();
    ConsumedCapacity::new(rows.len().max(1) as u64, bytes.div_ceil(1024).max(1), 0)
}
