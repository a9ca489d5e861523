//! Group, Sort and SFW integration tests
//!
//! The client-side engines sit above a Receive and see rows in whatever
//! order the shards return them. Their results must not depend on that
//! order, on how rows are split into batches, or on how many calls it
//! takes to drain the query.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use aeroquery::fetch::InMemoryCluster;
use aeroquery::plan::{
    AggregateFunc, ArithKind, ArithOpStep, DistributionKind, PlanStep, PreparedPlan, SfwStep,
    SortSpec,
};
use aeroquery::{BoundVariables, ExecuteOptions, QueryError, Record, Value};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use common::{
    aggregate, cluster, constant, drain, driver, field, group, ids, int_field, receive, row,
    shuffled_rows, sort,
};

fn unsorted_receive() -> PlanStep {
    receive(0, DistributionKind::AllPartitions, vec![], vec![])
}

fn by_key(rows: &[Value], value_field: &str) -> HashMap<String, Option<i64>> {
    rows.iter()
        .filter_map(Value::as_record)
        .map(|r| {
            let key = match r.get("k") {
                Some(Value::String(s)) => s.clone(),
                other => format!("{:?}", other),
            };
            (key, r.get(value_field).and_then(Value::as_i64))
        })
        .collect()
}

fn tagged(id: i32, v: Value) -> Value {
    Value::Map(Record::new().with("id", id).with("v", v))
}

// =============================================================================
// Group Engine
// =============================================================================

/// SUM per key is the same whatever order the partial rows arrive in
#[tokio::test]
async fn test_group_sum_is_order_independent() {
    for seed in 0..10 {
        let mut rows = vec![row(1, "a", 1), row(2, "a", 2), row(3, "b", 3)];
        rows.shuffle(&mut StdRng::seed_from_u64(seed));
        let cluster = Arc::new(cluster(rows, 3, 2));
        let root = group(1, unsorted_receive(), 1, &["k", "v"], vec![AggregateFunc::Sum]);
        let plan = Arc::new(PreparedPlan::new(root, 2));
        let driver = driver(&cluster, 1);

        let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
            .await
            .unwrap();

        let sums = by_key(&drained.rows, "v");
        assert_eq!(sums.len(), 2);
        assert_eq!(sums["a"], Some(3));
        assert_eq!(sums["b"], Some(3));
        assert_eq!(drained.last.memory_in_use, 0);
    }
}

/// Larger randomized input: totals match a direct computation
#[tokio::test]
async fn test_group_sum_matches_direct_totals() {
    let rows = shuffled_rows(60, 42);
    let mut expected: HashMap<String, Option<i64>> = HashMap::new();
    for row in &rows {
        let key = format!("k{}", int_field(row, "id").unwrap() % 3);
        let v = int_field(row, "v").unwrap();
        let entry = expected.entry(key).or_insert(Some(0));
        *entry = entry.map(|t| t + v);
    }

    let cluster = Arc::new(cluster(rows, 4, 2));
    let root = group(1, unsorted_receive(), 1, &["k", "v"], vec![AggregateFunc::Sum]);
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 7);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(by_key(&drained.rows, "v"), expected);
}

/// Partial counts from several shards are added together
#[tokio::test]
async fn test_group_merges_partial_counts() {
    let counts = |k: &str, c: i64| Value::Map(Record::new().with("k", k).with("c", c));
    let cluster = Arc::new(
        InMemoryCluster::new()
            .with_partition(1, 1, vec![counts("a", 2), counts("b", 1)])
            .with_partition(2, 2, vec![counts("a", 3)]),
    );
    let root = group(1, unsorted_receive(), 1, &["k", "c"], vec![AggregateFunc::Count]);
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    let totals = by_key(&drained.rows, "c");
    assert_eq!(totals["a"], Some(5));
    assert_eq!(totals["b"], Some(1));
}

/// Without aggregates each new key is streamed as soon as it is seen
#[tokio::test]
async fn test_group_without_aggregates_streams_distinct_keys() {
    let keys = ["a", "b", "a", "c", "b"];
    let rows = keys
        .iter()
        .enumerate()
        .map(|(i, k)| row(i as i32, k, 0))
        .collect();
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, rows));
    let mut root = group(1, unsorted_receive(), 1, &["k"], vec![]);
    if let PlanStep::Group(step) = &mut root {
        step.is_distinct = true;
    }
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 2);

    let first = driver
        .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(first.rows.len(), 2, "keys of the first batch are not held back");
    let token = first.continuation.clone().unwrap();

    let mut keys_seen: Vec<Value> = first.rows;
    let mut token = Some(token);
    while let Some(t) = token {
        let outcome = driver
            .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), Some(&t))
            .await
            .unwrap();
        keys_seen.extend(outcome.rows);
        token = outcome.continuation;
    }

    let names: Vec<Value> = keys_seen
        .iter()
        .filter_map(|r| r.as_record().and_then(|r| r.get("k")).cloned())
        .collect();
    assert_eq!(names, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
}

/// Aggregates without grouping columns produce one row even for no input
#[tokio::test]
async fn test_group_without_keys_over_empty_input() {
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, vec![]));
    let root = group(
        1,
        unsorted_receive(),
        0,
        &["n", "s"],
        vec![AggregateFunc::CountStar, AggregateFunc::Sum],
    );
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(drained.rows.len(), 1);
    let record = drained.rows[0].as_record().unwrap();
    assert_eq!(record.get("n").and_then(Value::as_i64), Some(0));
    assert_eq!(record.get("s"), Some(&Value::Null));
}

fn without_key(id: i32, v: i64) -> Value {
    Value::Map(Record::new().with("id", id).with("v", v))
}

fn with_key(id: i32, key: Value, v: i64) -> Value {
    Value::Map(Record::new().with("id", id).with("k", key).with("v", v))
}

/// A distinct group without aggregates turns a missing grouping value into
/// SQL null
#[tokio::test]
async fn test_distinct_group_maps_missing_key_to_null() {
    let rows = vec![
        row(1, "a", 1),
        without_key(2, 2),
        row(3, "a", 3),
        with_key(4, Value::Empty, 4),
    ];
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, rows));
    let mut root = group(1, unsorted_receive(), 1, &["k"], vec![]);
    if let PlanStep::Group(step) = &mut root {
        step.is_distinct = true;
    }
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    let keys: Vec<Value> = drained
        .rows
        .iter()
        .filter_map(|r| r.as_record().and_then(|r| r.get("k")).cloned())
        .collect();
    assert_eq!(keys, vec![Value::from("a"), Value::Null]);
}

/// With aggregates a row missing its grouping value is skipped, while an
/// explicit null forms a group of its own
#[tokio::test]
async fn test_group_with_aggregates_skips_missing_key() {
    let rows = vec![
        row(1, "a", 1),
        without_key(2, 10),
        row(3, "a", 3),
        with_key(4, Value::Empty, 20),
        with_key(5, Value::Null, 7),
    ];
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, rows));
    let root = group(1, unsorted_receive(), 1, &["k", "v"], vec![AggregateFunc::Sum]);
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(drained.rows.len(), 2);
    let totals = by_key(&drained.rows, "v");
    assert_eq!(totals["a"], Some(4));
    assert_eq!(totals[&format!("{:?}", Some(&Value::Null))], Some(7));
    assert_eq!(drained.last.memory_in_use, 0);
}

/// A group that keeps its map while emitting holds its memory until the
/// query ends, then releases all of it
#[tokio::test]
async fn test_group_keeping_results_releases_memory_at_end() {
    let cluster = Arc::new(cluster(shuffled_rows(30, 4), 3, 2));
    let mut root = group(1, unsorted_receive(), 1, &["k", "v"], vec![AggregateFunc::Sum]);
    if let PlanStep::Group(step) = &mut root {
        step.remove_produced_result = false;
    }
    let plan = Arc::new(PreparedPlan::new(root, 2));
    let driver = driver(&cluster, 7);
    let bindings = BoundVariables::new();
    let options = ExecuteOptions::new().with_row_limit(1);

    let mut rows = Vec::new();
    let mut held = Vec::new();
    let mut outcome = driver
        .execute(&plan, &bindings, options.clone(), None)
        .await
        .unwrap();
    loop {
        if !outcome.rows.is_empty() {
            held.push(outcome.memory_in_use);
        }
        rows.append(&mut outcome.rows);
        let Some(token) = outcome.continuation.take() else {
            break;
        };
        outcome = driver
            .execute(&plan, &bindings, options.clone(), Some(&token))
            .await
            .unwrap();
    }

    let totals = by_key(&rows, "v");
    assert_eq!(totals["k0"], Some(135));
    assert_eq!(totals["k1"], Some(145));
    assert_eq!(totals["k2"], Some(155));

    // every emitted group stays charged until the last call
    let suspended = &held[..held.len() - 1];
    assert!(!suspended.is_empty());
    assert!(suspended.iter().all(|m| *m > 0 && *m == suspended[0]));
    assert_eq!(outcome.memory_in_use, 0);
    assert_eq!(driver.active_queries(), 0);
}

// =============================================================================
// Sort Engine
// =============================================================================

fn sort_input() -> Vec<Value> {
    vec![
        tagged(0, Value::from(2)),
        tagged(1, Value::from(1)),
        tagged(2, Value::from(2)),
        tagged(3, Value::from(1)),
        tagged(4, Value::Null),
    ]
}

async fn run_sort(specs: Vec<SortSpec>) -> Vec<i64> {
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, sort_input()));
    let plan = Arc::new(PreparedPlan::new(sort(1, unsorted_receive(), specs), 2));
    let driver = driver(&cluster, 2);
    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();
    assert_eq!(drained.last.memory_in_use, 0);
    ids(&drained.rows)
}

/// Equal keys keep their arrival order; nulls go last by default
#[tokio::test]
async fn test_sort_is_stable() {
    assert_eq!(run_sort(vec![SortSpec::asc("v")]).await, vec![1, 3, 0, 2, 4]);
}

/// Descending order keeps nulls where they were requested
#[tokio::test]
async fn test_sort_descending_null_placement() {
    assert_eq!(run_sort(vec![SortSpec::desc("v")]).await, vec![0, 2, 1, 3, 4]);
    assert_eq!(
        run_sort(vec![SortSpec::desc("v").nulls_first()]).await,
        vec![4, 0, 2, 1, 3]
    );
}

/// Buffered rows stay charged between calls and are released as they go out
#[tokio::test]
async fn test_sort_holds_memory_while_buffering() {
    let cluster = Arc::new(cluster(shuffled_rows(20, 8), 1, 1));
    let plan = Arc::new(PreparedPlan::new(
        sort(1, unsorted_receive(), vec![SortSpec::asc("id")]),
        2,
    ));
    let driver = driver(&cluster, 5);

    let first = driver
        .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), None)
        .await
        .unwrap();
    assert!(first.rows.is_empty());
    assert!(first.memory_in_use > 0);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();
    assert_eq!(ids(&drained.rows), (0..20).collect::<Vec<i64>>());
    assert_eq!(drained.last.memory_in_use, 0);
}

/// A sort that cannot buffer its input within budget fails
#[tokio::test]
async fn test_sort_over_budget() {
    let cluster = Arc::new(cluster(shuffled_rows(50, 8), 1, 1));
    let plan = Arc::new(PreparedPlan::new(
        sort(1, unsorted_receive(), vec![SortSpec::asc("id")]),
        2,
    ));
    let driver = driver(&cluster, 50);

    let err = driver
        .execute(
            &plan,
            &BoundVariables::new(),
            ExecuteOptions::new().with_max_memory(256),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::MemoryExceeded { .. }));
    assert_eq!(driver.active_queries(), 0);
}

// =============================================================================
// SFW
// =============================================================================

fn sfw(columns: Vec<PlanStep>, names: &[&str]) -> SfwStep {
    SfwStep {
        result_reg: 1,
        from: Box::new(unsorted_receive()),
        from_var_name: "$row".into(),
        columns,
        column_names: names.iter().map(|s| s.to_string()).collect(),
        gb_column_count: None,
        select_star: false,
        offset: None,
        limit: None,
    }
}

/// OFFSET and LIMIT apply to projected rows
#[tokio::test]
async fn test_sfw_projection_with_offset_and_limit() {
    let rows = (0..6).map(|i| row(i, "a", i64::from(i))).collect();
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, rows));
    let mut step = sfw(vec![field(2, 0, "id")], &["id"]);
    step.offset = Some(Box::new(constant(3, 1)));
    step.limit = Some(Box::new(constant(4, 2)));
    let plan = Arc::new(PreparedPlan::new(PlanStep::Sfw(step), 5));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(ids(&drained.rows), vec![1, 2]);
    assert_eq!(drained.rows[0].as_record().unwrap().len(), 1);
}

/// A negative LIMIT is rejected
#[tokio::test]
async fn test_sfw_negative_limit() {
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, vec![row(1, "a", 1)]));
    let mut step = sfw(vec![field(2, 0, "id")], &["id"]);
    step.limit = Some(Box::new(constant(3, -1)));
    let plan = Arc::new(PreparedPlan::new(PlanStep::Sfw(step), 4));
    let driver = driver(&cluster, 10);

    let err = driver
        .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

/// Arithmetic over projected fields
#[tokio::test]
async fn test_sfw_arithmetic_column() {
    let cluster = Arc::new(
        InMemoryCluster::new().with_partition(1, 1, vec![row(1, "a", 3), row(2, "b", 5)]),
    );
    let doubled = PlanStep::ArithOp(ArithOpStep {
        result_reg: 2,
        kind: ArithKind::Multiplicative,
        args: vec![field(3, 0, "v"), constant(4, 2)],
        ops: "**".into(),
    });
    let step = sfw(vec![field(5, 0, "id"), doubled], &["id", "twice"]);
    let plan = Arc::new(PreparedPlan::new(PlanStep::Sfw(step), 6));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    let twice: Vec<Option<i64>> = drained
        .rows
        .iter()
        .map(|r| int_field(r, "twice"))
        .collect();
    assert_eq!(twice, vec![Some(6), Some(10)]);
}

/// Grouping over input sorted on the grouping column, across calls
#[tokio::test]
async fn test_sfw_groups_sorted_input() {
    let cluster = Arc::new(cluster(shuffled_rows(30, 5), 3, 3).with_sort(vec![SortSpec::asc("k")]));
    let mut step = sfw(
        vec![
            field(2, 0, "k"),
            aggregate(3, AggregateFunc::Sum, Some(field(4, 0, "v"))),
        ],
        &["k", "total"],
    );
    step.from = Box::new(receive(
        0,
        DistributionKind::AllShards,
        vec![SortSpec::asc("k")],
        vec![],
    ));
    step.gb_column_count = Some(1);
    let plan = Arc::new(
        PreparedPlan::new(PlanStep::Sfw(step), 5).with_shard_ids(cluster.shard_ids()),
    );
    let driver = driver(&cluster, 4);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    let keys: Vec<Value> = drained
        .rows
        .iter()
        .filter_map(|r| r.as_record().and_then(|r| r.get("k")).cloned())
        .collect();
    assert_eq!(keys, vec![Value::from("k0"), Value::from("k1"), Value::from("k2")]);
    let totals = by_key(&drained.rows, "total");
    assert_eq!(totals["k0"], Some(135));
    assert_eq!(totals["k1"], Some(145));
    assert_eq!(totals["k2"], Some(155));
    assert_eq!(drained.last.memory_in_use, 0);
}

/// Aggregates without grouping columns over no rows still produce a row
#[tokio::test]
async fn test_sfw_global_aggregate_over_empty_input() {
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, vec![]));
    let mut step = sfw(vec![aggregate(2, AggregateFunc::CountStar, None)], &["n"]);
    step.gb_column_count = Some(0);
    let plan = Arc::new(PreparedPlan::new(PlanStep::Sfw(step), 3));
    let driver = driver(&cluster, 10);

    let drained = drain(&driver, &cluster, &plan, ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(drained.rows.len(), 1);
    assert_eq!(int_field(&drained.rows[0], "n"), Some(0));
}

/// An aggregate in a projection without grouping is rejected before any
/// fetch
#[tokio::test]
async fn test_sfw_aggregate_without_grouping_rejected() {
    let cluster = Arc::new(InMemoryCluster::new().with_partition(1, 1, vec![row(1, "a", 1)]));
    let step = sfw(
        vec![
            field(2, 0, "id"),
            aggregate(3, AggregateFunc::CountStar, None),
        ],
        &["id", "n"],
    );
    let plan = Arc::new(PreparedPlan::new(PlanStep::Sfw(step), 4));
    let driver = driver(&cluster, 10);

    let err = driver
        .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Protocol(_)));
    assert_eq!(cluster.fetch_count(), 0);
    assert_eq!(driver.active_queries(), 0);
}
