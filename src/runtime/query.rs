//! State of one logical query between calls

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::QueryResult;
use crate::fetch::{ConsumedCapacity, Fetcher};
use crate::iter::{create_iterator, PlanIter};
use crate::observability::QueryMetrics;
use crate::plan::{validate_plan, PreparedPlan, RegisterId};
use crate::value::Value;

use super::config::QueryConfig;
use super::continuation::ContinuationToken;
use super::control::{CancelSignal, RuntimeControl};

pub struct QueryRuntime {
    plan: Arc<PreparedPlan>,
    root: PlanIter,
    root_reg: RegisterId,
    rcb: RuntimeControl,
    /// Rows pulled from the tree and not yet handed to the caller
    pending: Vec<Value>,
    /// Calls answered with a continuation so far
    sequence: u64,
}

impl QueryRuntime {
    pub fn new(
        query_id: Uuid,
        plan: Arc<PreparedPlan>,
        external_vars: Vec<Option<Value>>,
        fetcher: Arc<dyn Fetcher>,
        config: QueryConfig,
        metrics: Arc<QueryMetrics>,
    ) -> QueryResult<Self> {
        validate_plan(&plan)?;
        let root = create_iterator(&plan.root, &plan)?;
        let rcb = RuntimeControl::new(query_id, plan.num_registers, fetcher, config, metrics)
            .with_external_vars(external_vars)
            .with_compile_cost(plan.compile_cost);
        Ok(Self {
            root_reg: root.result_reg(),
            root,
            rcb,
            plan,
            pending: Vec::new(),
            sequence: 0,
        })
    }

    pub fn query_id(&self) -> Uuid {
        self.rcb.query_id()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether `plan` is the plan this query was started with
    pub fn runs(&self, plan: &Arc<PreparedPlan>) -> bool {
        Arc::ptr_eq(&self.plan, plan) || *self.plan == **plan
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        self.rcb.ledger().set_limit(bytes);
    }

    /// Pulls rows until the tree is drained, `row_limit` rows are pending or
    /// the call's fetch is spent. Returns whether the query has more rows.
    ///
    /// Rows are kept in the runtime as they are pulled, so a call that fails
    /// or is dropped mid-fetch loses nothing.
    pub async fn run_call(
        &mut self,
        row_limit: Option<usize>,
        cancel: Option<CancelSignal>,
    ) -> QueryResult<bool> {
        self.rcb.begin_call(cancel);
        loop {
            if row_limit.is_some_and(|limit| self.pending.len() >= limit) {
                return Ok(true);
            }
            if !self.root.next(&mut self.rcb).await? {
                return Ok(self.rcb.needs_continuation());
            }
            self.pending.push(self.rcb.reg(self.root_reg).clone());
        }
    }

    pub fn take_rows(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.pending)
    }

    pub fn take_call_consumed(&mut self) -> ConsumedCapacity {
        self.rcb.take_call_consumed()
    }

    pub fn total_consumed(&self) -> ConsumedCapacity {
        self.rcb.total_consumed()
    }

    pub fn memory_in_use(&self) -> u64 {
        self.rcb.ledger().used()
    }

    /// Issues the token for the next call
    pub fn advance(&mut self) -> ContinuationToken {
        self.sequence += 1;
        ContinuationToken::new(self.query_id(), self.sequence)
    }

    /// Releases every memory charge held by the iterator tree
    pub fn close(&mut self) {
        self.root.close(&self.rcb);
        self.pending.clear();
    }
}
