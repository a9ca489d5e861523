//! Plan Model
//!
//! The server compiles a query into a tree of step descriptors and ships it
//! to the client already decoded. A `PreparedPlan` bundles the tree with
//! everything the runtime needs to execute it:
//!
//! - the register count (size of the register arena)
//! - the declared external variables, by position
//! - the shard topology used by sorted all-shards scans
//! - the compile cost of an unprepared statement, charged once
//!
//! Plans are immutable once prepared and can be shared by many executions.

mod step;
mod validate;

pub use step::{
    AggregateFunc, AggregateStep, ArithKind, ArithOpStep, ConstStep, DistributionKind,
    ExternalVarRefStep, FieldAccessStep, GroupStep, PlanStep, ReceiveStep, RegisterId, SfwStep,
    SortSpec, SortStep, VarRefStep,
};
pub use validate::validate_plan;

use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, QueryResult};
use crate::fetch::{ConsumedCapacity, ShardId};

/// An external (bind) variable declared by the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalVarInfo {
    pub name: String,
    /// Position of the variable in the bind array
    pub id: usize,
}

/// A decoded, executable plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedPlan {
    pub root: PlanStep,
    pub num_registers: usize,
    #[serde(default)]
    pub external_vars: Vec<ExternalVarInfo>,
    /// Shard ids known when the statement was prepared
    #[serde(default)]
    pub shard_ids: Vec<ShardId>,
    /// Present only when the statement was compiled for this execution
    /// (an unprepared query); charged on the first fetch
    #[serde(default)]
    pub compile_cost: Option<ConsumedCapacity>,
}

impl PreparedPlan {
    /// Creates a plan with no external variables and no topology
    pub fn new(root: PlanStep, num_registers: usize) -> Self {
        Self {
            root,
            num_registers,
            external_vars: Vec::new(),
            shard_ids: Vec::new(),
            compile_cost: None,
        }
    }

    pub fn with_external_vars(mut self, vars: Vec<ExternalVarInfo>) -> Self {
        self.external_vars = vars;
        self
    }

    pub fn with_shard_ids(mut self, shard_ids: Vec<ShardId>) -> Self {
        self.shard_ids = shard_ids;
        self
    }

    pub fn with_compile_cost(mut self, cost: ConsumedCapacity) -> Self {
        self.compile_cost = Some(cost);
        self
    }

    /// Decodes and validates a plan shipped as JSON
    pub fn from_json(json: &str) -> QueryResult<Self> {
        let plan: PreparedPlan = serde_json::from_str(json)
            .map_err(|e| QueryError::protocol(format!("undecodable plan: {}", e)))?;
        validate_plan(&plan)?;
        Ok(plan)
    }

    /// Whether any Receive step in the plan needs to merge sorted streams
    pub fn has_sorting_receive(&self) -> bool {
        fn walk(step: &PlanStep) -> bool {
            match step {
                PlanStep::Receive(r) => !r.sort_specs.is_empty(),
                other => other.children().into_iter().any(walk),
            }
        }
        walk(&self.root)
    }
}
