//! Shared helpers for integration tests
//!
//! Plan builders for the shapes the tests exercise, plus a driver loop that
//! runs a query to completion and checks the one-fetch-per-call budget on
//! every call.

#![allow(dead_code)]

use std::sync::Arc;

use aeroquery::fetch::InMemoryCluster;
use aeroquery::plan::{
    AggregateFunc, AggregateStep, ConstStep, DistributionKind, FieldAccessStep, GroupStep,
    PlanStep, PreparedPlan, ReceiveStep, SfwStep, SortSpec, SortStep, VarRefStep,
};
use aeroquery::{
    BoundVariables, ExecuteOptions, Fetcher, QueryConfig, QueryDriver, QueryOutcome,
    QueryResult, Record, Value,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub fn row(id: i32, key: &str, v: i64) -> Value {
    Value::Map(Record::new().with("id", id).with("k", key).with("v", v))
}

pub fn int_field(row: &Value, name: &str) -> Option<i64> {
    row.as_record()?.get(name)?.as_i64()
}

pub fn ids(rows: &[Value]) -> Vec<i64> {
    rows.iter().filter_map(|r| int_field(r, "id")).collect()
}

/// Rows `0..n` with shuffled ids
pub fn shuffled_rows(n: i32, seed: u64) -> Vec<Value> {
    let mut ids: Vec<i32> = (0..n).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(seed));
    ids.into_iter()
        .map(|id| row(id, &format!("k{}", id % 3), i64::from(id)))
        .collect()
}

/// Deals `rows` round-robin over `partitions` partitions spread over
/// `shards` shards (partition p lives on shard `p % shards + 1`)
pub fn cluster(rows: Vec<Value>, partitions: i32, shards: i32) -> InMemoryCluster {
    let mut dealt: Vec<Vec<Value>> = vec![Vec::new(); partitions as usize];
    for (i, row) in rows.into_iter().enumerate() {
        dealt[i % partitions as usize].push(row);
    }
    dealt
        .into_iter()
        .enumerate()
        .fold(InMemoryCluster::new(), |cluster, (p, rows)| {
            let p = p as i32;
            cluster.with_partition(p + 1, p % shards + 1, rows)
        })
}

pub fn receive(
    reg: usize,
    distribution: DistributionKind,
    sort_specs: Vec<SortSpec>,
    primary_key_fields: Vec<&str>,
) -> PlanStep {
    PlanStep::Receive(ReceiveStep {
        result_reg: reg,
        distribution,
        sort_specs,
        primary_key_fields: primary_key_fields.into_iter().map(String::from).collect(),
    })
}

pub fn field(reg: usize, from_reg: usize, name: &str) -> PlanStep {
    PlanStep::FieldStep(FieldAccessStep {
        result_reg: reg,
        input: Box::new(PlanStep::VarRef(VarRefStep {
            result_reg: from_reg,
            name: "$row".into(),
        })),
        field_name: name.into(),
    })
}

pub fn constant(reg: usize, value: impl Into<Value>) -> PlanStep {
    PlanStep::Const(ConstStep {
        result_reg: reg,
        value: value.into(),
    })
}

pub fn aggregate(reg: usize, func: AggregateFunc, input: Option<PlanStep>) -> PlanStep {
    PlanStep::Aggregate(AggregateStep {
        result_reg: reg,
        func,
        input: input.map(Box::new),
    })
}

/// SELECT * over `from`
pub fn select_star(reg: usize, from: PlanStep) -> PlanStep {
    PlanStep::Sfw(SfwStep {
        result_reg: reg,
        from: Box::new(from),
        from_var_name: "$row".into(),
        columns: Vec::new(),
        column_names: Vec::new(),
        gb_column_count: None,
        select_star: true,
        offset: None,
        limit: None,
    })
}

pub fn group(
    reg: usize,
    input: PlanStep,
    gb_column_count: usize,
    column_names: &[&str],
    aggregate_funcs: Vec<AggregateFunc>,
) -> PlanStep {
    PlanStep::Group(GroupStep {
        result_reg: reg,
        input: Box::new(input),
        gb_column_count,
        column_names: column_names.iter().map(|s| s.to_string()).collect(),
        aggregate_funcs,
        is_distinct: false,
        remove_produced_result: true,
        count_memory: true,
    })
}

pub fn sort(reg: usize, input: PlanStep, sort_specs: Vec<SortSpec>) -> PlanStep {
    PlanStep::Sort(SortStep {
        result_reg: reg,
        input: Box::new(input),
        sort_specs,
        count_memory: true,
    })
}

pub fn driver(cluster: &Arc<InMemoryCluster>, batch_limit: u32) -> QueryDriver {
    let fetcher: Arc<dyn Fetcher> = Arc::clone(cluster) as Arc<dyn Fetcher>;
    QueryDriver::new(fetcher, QueryConfig::with_batch_limit(batch_limit))
}

pub struct Drained {
    pub rows: Vec<Value>,
    pub calls: usize,
    pub last: QueryOutcome,
}

/// Runs a query to completion, asserting that no call fetches more than
/// once and that consumed capacity only grows
pub async fn drain(
    driver: &QueryDriver,
    cluster: &InMemoryCluster,
    plan: &Arc<PreparedPlan>,
    options: ExecuteOptions,
) -> QueryResult<Drained> {
    let bindings = BoundVariables::new();
    let mut rows = Vec::new();
    let mut calls = 0;
    let mut token = None;
    let mut read_units = 0;
    loop {
        let before = cluster.fetch_count();
        let outcome = driver
            .execute(plan, &bindings, options.clone(), token.as_ref())
            .await?;
        calls += 1;
        assert!(
            cluster.fetch_count() - before <= 1,
            "call {} fetched {} times",
            calls,
            cluster.fetch_count() - before
        );
        assert!(outcome.total_consumed.read_units >= read_units);
        read_units = outcome.total_consumed.read_units;
        if let Some(limit) = options.row_limit {
            assert!(outcome.rows.len() <= limit);
        }
        rows.extend(outcome.rows.iter().cloned());
        token = outcome.continuation.clone();
        if token.is_none() {
            return Ok(Drained {
                rows,
                calls,
                last: outcome,
            });
        }
        assert!(calls < 10_000, "query never finished");
    }
}
