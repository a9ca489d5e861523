use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tracing::{debug, info};

use crate::errors::{QueryError, QueryResult};
use crate::fetch::{Batch, FetchRequest, FetchTarget, SortPhase1Info};
use crate::observability::Event;
use crate::plan::{DistributionKind, PreparedPlan, ReceiveStep, RegisterId};
use crate::runtime::{MemoryLedger, RuntimeControl};
use crate::value::{RowComparator, Value};

use super::dedup::DuplicateSet;
use super::partial::PartialResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    /// One unsorted stream
    Simple,
    /// Discovering the partitions of a sorted all-partitions scan
    SortPhase1,
    /// Merging sorted partial results
    SortMerge,
    Done,
}

pub struct ReceiveIter {
    result_reg: RegisterId,
    distribution: DistributionKind,
    comparator: RowComparator,
    state: ReceiveState,
    dedup: Option<DuplicateSet>,
    simple: PartialResult,
    phase1_continuation: Option<Vec<u8>>,
    discovered: HashSet<i32>,
    heap: BinaryHeap<Reverse<PartialResult>>,
    /// None once the id space above the highest shard id is used up
    next_virtual_id: Option<i32>,
    /// Rows and bytes staged by partition fetches, for sizing the next one
    rows_staged: u64,
    bytes_staged: u64,
}

impl ReceiveIter {
    pub fn new(step: &ReceiveStep, plan: &PreparedPlan) -> QueryResult<Self> {
        let comparator = RowComparator::new(step.sort_specs.clone());
        let mut heap = BinaryHeap::new();
        let state = match (step.distribution, step.sort_specs.is_empty()) {
            (_, true) | (DistributionKind::SinglePartition, false) => ReceiveState::Simple,
            (DistributionKind::AllPartitions, false) => ReceiveState::SortPhase1,
            (DistributionKind::AllShards, false) => {
                if plan.shard_ids.is_empty() {
                    return Err(QueryError::protocol(
                        "sorted all-shards receive without a shard topology",
                    ));
                }
                for shard in &plan.shard_ids {
                    heap.push(Reverse(PartialResult::unstarted(
                        *shard,
                        FetchTarget::Shard(*shard),
                        comparator.clone(),
                    )));
                }
                ReceiveState::SortMerge
            }
        };
        let next_virtual_id = plan.shard_ids.iter().copied().max().unwrap_or(0).checked_add(1);

        Ok(Self {
            result_reg: step.result_reg,
            distribution: step.distribution,
            simple: PartialResult::unstarted(0, FetchTarget::Any, comparator.clone()),
            comparator,
            state,
            dedup: (!step.primary_key_fields.is_empty())
                .then(|| DuplicateSet::new(step.primary_key_fields.clone())),
            phase1_continuation: None,
            discovered: HashSet::new(),
            heap,
            next_virtual_id,
            rows_staged: 0,
            bytes_staged: 0,
        })
    }

    pub fn result_reg(&self) -> RegisterId {
        self.result_reg
    }

    pub async fn next(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        loop {
            match self.state {
                ReceiveState::Done => return Ok(false),
                ReceiveState::Simple => return self.next_simple(rcb).await,
                ReceiveState::SortMerge => return self.next_merged(rcb).await,
                ReceiveState::SortPhase1 => {
                    if !self.run_phase1(rcb).await? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    async fn next_simple(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        loop {
            if let Some(row) = self.simple.pop_row(rcb.ledger()) {
                if self.is_duplicate(&row, rcb)? {
                    continue;
                }
                rcb.set_reg(self.result_reg, row);
                return Ok(true);
            }
            if !self.simple.has_remote() {
                self.state = ReceiveState::Done;
                return Ok(false);
            }
            if rcb.fetch_done() {
                rcb.set_needs_continuation();
                return Ok(false);
            }
            let request = self.simple.next_request(rcb.config().batch_limit);
            let batch = rcb.fetch(request).await?;
            self.simple
                .stage(batch.rows, batch.continuation, rcb.ledger())?;
        }
    }

    /// One sort phase 1 round trip; returns true once phase 1 is over
    async fn run_phase1(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        if rcb.fetch_done() {
            rcb.set_needs_continuation();
            return Ok(false);
        }
        let request = FetchRequest {
            continuation: self.phase1_continuation.clone(),
            limit: rcb.config().batch_limit,
            target: FetchTarget::SortPhase1,
            virtual_scan: None,
        };
        let batch = rcb.fetch(request).await?;
        let in_phase1 = self.stage_phase1(batch, rcb.ledger())?;

        if in_phase1 {
            rcb.set_needs_continuation();
            return Ok(false);
        }
        info!(
            event = Event::SortPhase1Complete.as_str(),
            query_id = %rcb.query_id(),
            partitions = self.discovered.len(),
            "all partitions discovered"
        );
        self.state = ReceiveState::SortMerge;
        Ok(true)
    }

    /// Validates a phase 1 batch and seeds one partial result per
    /// discovered partition; returns whether phase 1 continues
    fn stage_phase1(&mut self, batch: Batch, ledger: &MemoryLedger) -> QueryResult<bool> {
        let info = batch
            .phase1
            .ok_or_else(|| QueryError::protocol("sort phase 1 batch without partition info"))?;
        validate_phase1(&info, batch.rows.len(), &self.discovered)?;
        if info.in_phase1 && batch.continuation.is_none() {
            return Err(QueryError::protocol(
                "sort phase 1 in progress without a continuation",
            ));
        }

        let sized: Vec<(Value, u64)> = batch
            .rows
            .into_iter()
            .map(|row| {
                let size = row.size_in_bytes();
                (row, size)
            })
            .collect();
        let total: u64 = sized.iter().map(|(_, size)| size).sum();
        ledger.charge(total)?;
        self.rows_staged += sized.len() as u64;
        self.bytes_staged += total;

        let mut rows = sized.into_iter();
        for ((pid, count), key) in info
            .partition_ids
            .iter()
            .zip(info.result_counts.iter())
            .zip(info.continuation_keys.into_iter())
        {
            let partition_rows: Vec<(Value, u64)> = rows.by_ref().take(*count as usize).collect();
            self.discovered.insert(*pid);
            if partition_rows.is_empty() && key.is_none() {
                continue;
            }
            self.heap.push(Reverse(PartialResult::discovered(
                *pid,
                partition_rows,
                key,
                self.comparator.clone(),
            )));
        }

        self.phase1_continuation = batch.continuation;
        Ok(info.in_phase1)
    }

    async fn next_merged(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        loop {
            let Some(top) = self.heap.peek() else {
                self.state = ReceiveState::Done;
                return Ok(false);
            };

            if top.0.has_rows() {
                let Some(Reverse(mut top)) = self.heap.pop() else {
                    continue;
                };
                let row = top.pop_row(rcb.ledger());
                if !top.is_exhausted() {
                    self.heap.push(Reverse(top));
                }
                let Some(row) = row else {
                    continue;
                };
                if self.is_duplicate(&row, rcb)? {
                    continue;
                }
                rcb.set_reg(self.result_reg, row);
                return Ok(true);
            }

            if !top.0.has_remote() {
                self.heap.pop();
                continue;
            }
            if rcb.fetch_done() {
                rcb.set_needs_continuation();
                return Ok(false);
            }

            let limit = self.merge_fetch_limit(rcb)?;
            let request = top.0.next_request(limit);
            let batch = rcb.fetch(request).await?;

            // the fetched source is still on top: nothing touched the heap
            let Some(Reverse(mut top)) = self.heap.pop() else {
                return Err(QueryError::defect("merge heap emptied during a fetch"));
            };
            let virtual_scans = batch.virtual_scans;
            match top.stage(batch.rows, batch.continuation, rcb.ledger()) {
                Ok((rows, bytes)) => {
                    if self.distribution == DistributionKind::AllPartitions {
                        self.rows_staged += rows;
                        self.bytes_staged += bytes;
                    }
                    self.heap.push(Reverse(top));
                }
                Err(e) => {
                    self.heap.push(Reverse(top));
                    return Err(e);
                }
            }

            for scan in virtual_scans {
                let Some(id) = self.next_virtual_id else {
                    return Err(QueryError::protocol(
                        "no virtual scan id left above the highest shard id",
                    ));
                };
                self.next_virtual_id = id.checked_add(1);
                debug!(
                    event = Event::VirtualScanSeeded.as_str(),
                    query_id = %rcb.query_id(),
                    id,
                    shard_id = scan.shard_id,
                    partition_id = scan.partition_id,
                    "virtual scan joined the merge"
                );
                self.heap.push(Reverse(PartialResult::virtual_scan(
                    id,
                    scan,
                    self.comparator.clone(),
                )));
            }
        }
    }

    /// Rows to request for the source on top of the merge heap
    fn merge_fetch_limit(&self, rcb: &RuntimeControl) -> QueryResult<u32> {
        let config = rcb.config();
        if self.distribution != DistributionKind::AllPartitions {
            return Ok(config.batch_limit);
        }
        let dedup_memory = self.dedup.as_ref().map_or(0, DuplicateSet::memory);
        let limit = rcb.ledger().limit();
        let available = limit.saturating_sub(dedup_memory);
        let per_row = if self.rows_staged == 0 {
            1
        } else {
            (self.bytes_staged / self.rows_staged).max(1)
        };
        let rows = available / per_row;
        if rows == 0 {
            return Err(QueryError::MemoryExceeded {
                used: rcb.ledger().used().max(dedup_memory + per_row),
                limit,
            });
        }
        Ok(rows.min(u64::from(config.partition_fetch_cap)) as u32)
    }

    fn is_duplicate(&mut self, row: &Value, rcb: &RuntimeControl) -> QueryResult<bool> {
        let Some(dedup) = self.dedup.as_mut() else {
            return Ok(false);
        };
        let duplicate = dedup.is_duplicate(row, rcb.ledger())?;
        if duplicate {
            rcb.metrics().increment_duplicates_dropped();
            debug!(
                event = Event::DuplicateDropped.as_str(),
                query_id = %rcb.query_id(),
                "row already returned by another shard"
            );
        }
        Ok(duplicate)
    }

    pub fn close(&mut self, rcb: &RuntimeControl) {
        let ledger = rcb.ledger();
        self.simple.release(ledger);
        for Reverse(mut partial) in self.heap.drain() {
            partial.release(ledger);
        }
        if let Some(dedup) = self.dedup.as_mut() {
            dedup.release(ledger);
        }
        self.state = ReceiveState::Done;
    }
}

fn validate_phase1(
    info: &SortPhase1Info,
    row_count: usize,
    discovered: &HashSet<i32>,
) -> QueryResult<()> {
    let n = info.partition_ids.len();
    if info.result_counts.len() != n || info.continuation_keys.len() != n {
        return Err(QueryError::protocol(format!(
            "sort phase 1 reported {} partitions, {} result counts and {} continuation keys",
            n,
            info.result_counts.len(),
            info.continuation_keys.len()
        )));
    }
    let mut total: u64 = 0;
    let mut seen = HashSet::with_capacity(n);
    for (pid, count) in info.partition_ids.iter().zip(info.result_counts.iter()) {
        if *count < 0 {
            return Err(QueryError::protocol(format!(
                "negative result count {} for partition {}",
                count, pid
            )));
        }
        if discovered.contains(pid) || !seen.insert(*pid) {
            return Err(QueryError::protocol(format!(
                "partition {} reported twice in sort phase 1",
                pid
            )));
        }
        total += *count as u64;
    }
    if total != row_count as u64 {
        return Err(QueryError::protocol(format!(
            "sort phase 1 result counts sum to {} but the batch has {} rows",
            total, row_count
        )));
    }
    Ok(())
}
