//! Plan step descriptors
//!
//! A step is pure data: it names its inputs, its configuration and the
//! register slot where it publishes its result. Iterators are built from
//! steps by `iter::create_iterator`.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Index into the runtime's register array
pub type RegisterId = usize;

/// One sort key: field name, direction and requested null placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub nulls_first: bool,
}

impl SortSpec {
    /// Ascending, nulls last
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
            nulls_first: false,
        }
    }

    /// Descending, nulls last
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
            nulls_first: false,
        }
    }

    /// Requests nulls before all other values
    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = true;
        self
    }
}

/// How many physical sources a query fans out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionKind {
    SinglePartition,
    AllPartitions,
    AllShards,
}

impl DistributionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionKind::SinglePartition => "SINGLE_PARTITION",
            DistributionKind::AllPartitions => "ALL_PARTITIONS",
            DistributionKind::AllShards => "ALL_SHARDS",
        }
    }
}

/// Aggregate function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    CountStar,
    Count,
    CountNumbers,
    Sum,
    Min,
    Max,
    Collect,
    CollectDistinct,
}

impl AggregateFunc {
    /// Count functions whose partial results are merged by summation
    pub fn is_count(&self) -> bool {
        matches!(
            self,
            AggregateFunc::CountStar | AggregateFunc::Count | AggregateFunc::CountNumbers
        )
    }
}

/// Additive steps use `+`/`-`, multiplicative steps use `*`, `/` and `d`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithKind {
    Additive,
    Multiplicative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstStep {
    pub result_reg: RegisterId,
    pub value: Value,
}

/// Reference to a variable bound by an enclosing step (the SFW from-variable).
/// Its register is the variable's register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRefStep {
    pub result_reg: RegisterId,
    pub name: String,
}

/// Reference to an external (bind) variable, by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalVarRefStep {
    pub result_reg: RegisterId,
    pub name: String,
    pub id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAccessStep {
    pub result_reg: RegisterId,
    pub input: Box<PlanStep>,
    pub field_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArithOpStep {
    pub result_reg: RegisterId,
    pub kind: ArithKind,
    pub args: Vec<PlanStep>,
    /// One operator character per argument; the first applies to the
    /// identity element (`0 + a - b`, `1 * a / b`)
    pub ops: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStep {
    pub result_reg: RegisterId,
    pub func: AggregateFunc,
    #[serde(default)]
    pub input: Option<Box<PlanStep>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfwStep {
    pub result_reg: RegisterId,
    /// Row source; its result register is the from-variable's register
    pub from: Box<PlanStep>,
    #[serde(default)]
    pub from_var_name: String,
    #[serde(default)]
    pub columns: Vec<PlanStep>,
    #[serde(default)]
    pub column_names: Vec<String>,
    /// Number of leading grouping columns when grouping sorted input
    #[serde(default)]
    pub gb_column_count: Option<usize>,
    #[serde(default)]
    pub select_star: bool,
    #[serde(default)]
    pub offset: Option<Box<PlanStep>>,
    #[serde(default)]
    pub limit: Option<Box<PlanStep>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStep {
    pub result_reg: RegisterId,
    pub input: Box<PlanStep>,
    pub gb_column_count: usize,
    /// Grouping columns first, then one column per aggregate function
    pub column_names: Vec<String>,
    pub aggregate_funcs: Vec<AggregateFunc>,
    #[serde(default)]
    pub is_distinct: bool,
    #[serde(default)]
    pub remove_produced_result: bool,
    #[serde(default = "default_true")]
    pub count_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub result_reg: RegisterId,
    pub input: Box<PlanStep>,
    pub sort_specs: Vec<SortSpec>,
    #[serde(default = "default_true")]
    pub count_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveStep {
    pub result_reg: RegisterId,
    pub distribution: DistributionKind,
    #[serde(default)]
    pub sort_specs: Vec<SortSpec>,
    /// Primary key fields; non-empty when shards can return the same row twice
    #[serde(default)]
    pub primary_key_fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A node of the plan tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Const(ConstStep),
    VarRef(VarRefStep),
    ExternalVarRef(ExternalVarRefStep),
    FieldStep(FieldAccessStep),
    ArithOp(ArithOpStep),
    Aggregate(AggregateStep),
    Sfw(SfwStep),
    Group(GroupStep),
    Sort(SortStep),
    Receive(ReceiveStep),
}

impl PlanStep {
    pub fn result_reg(&self) -> RegisterId {
        match self {
            PlanStep::Const(s) => s.result_reg,
            PlanStep::VarRef(s) => s.result_reg,
            PlanStep::ExternalVarRef(s) => s.result_reg,
            PlanStep::FieldStep(s) => s.result_reg,
            PlanStep::ArithOp(s) => s.result_reg,
            PlanStep::Aggregate(s) => s.result_reg,
            PlanStep::Sfw(s) => s.result_reg,
            PlanStep::Group(s) => s.result_reg,
            PlanStep::Sort(s) => s.result_reg,
            PlanStep::Receive(s) => s.result_reg,
        }
    }

    /// Steps that may suspend on a fetch (directly or through their input)
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            PlanStep::Sfw(_) | PlanStep::Group(_) | PlanStep::Sort(_) | PlanStep::Receive(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanStep::Const(_) => "CONST",
            PlanStep::VarRef(_) => "VAR_REF",
            PlanStep::ExternalVarRef(_) => "EXTERNAL_VAR_REF",
            PlanStep::FieldStep(_) => "FIELD_STEP",
            PlanStep::ArithOp(_) => "ARITH_OP",
            PlanStep::Aggregate(_) => "AGGREGATE",
            PlanStep::Sfw(_) => "SFW",
            PlanStep::Group(_) => "GROUP",
            PlanStep::Sort(_) => "SORT",
            PlanStep::Receive(_) => "RECEIVE",
        }
    }

    /// Direct children, in evaluation order
    pub fn children(&self) -> Vec<&PlanStep> {
        match self {
            PlanStep::Const(_) | PlanStep::VarRef(_) | PlanStep::ExternalVarRef(_) => Vec::new(),
            PlanStep::Receive(_) => Vec::new(),
            PlanStep::FieldStep(s) => vec![s.input.as_ref()],
            PlanStep::ArithOp(s) => s.args.iter().collect(),
            PlanStep::Aggregate(s) => s.input.iter().map(|b| b.as_ref()).collect(),
            PlanStep::Sfw(s) => {
                let mut children = vec![s.from.as_ref()];
                children.extend(s.columns.iter());
                children.extend(s.offset.iter().map(|b| b.as_ref()));
                children.extend(s.limit.iter().map(|b| b.as_ref()));
                children
            }
            PlanStep::Group(s) => vec![s.input.as_ref()],
            PlanStep::Sort(s) => vec![s.input.as_ref()],
        }
    }
}
