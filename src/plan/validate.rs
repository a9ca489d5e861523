//! Plan validation
//!
//! Rejects plans whose shape the runtime cannot trust. Every failure here
//! is a protocol error: the server and the client disagree on the plan
//! format, and retrying will not help.

use crate::errors::{QueryError, QueryResult};
use crate::value::ArithOp;

use super::step::{ArithKind, DistributionKind, PlanStep};
use super::PreparedPlan;

/// Validates the whole plan tree
pub fn validate_plan(plan: &PreparedPlan) -> QueryResult<()> {
    if plan.num_registers == 0 {
        return Err(QueryError::protocol("plan declares zero registers"));
    }
    if !plan.root.is_async() {
        return Err(QueryError::protocol(format!(
            "plan root must be a row-producing step, found {}",
            plan.root.kind_name()
        )));
    }
    for (pos, var) in plan.external_vars.iter().enumerate() {
        if var.id != pos {
            return Err(QueryError::protocol(format!(
                "external variable {} declared at position {} with id {}",
                var.name, pos, var.id
            )));
        }
    }
    validate_step(plan, &plan.root)
}

/// Whether an aggregate is evaluated as part of this scalar expression
fn contains_aggregate(step: &PlanStep) -> bool {
    match step {
        PlanStep::Aggregate(_) => true,
        _ if step.is_async() => false,
        _ => step.children().into_iter().any(contains_aggregate),
    }
}

fn validate_step(plan: &PreparedPlan, step: &PlanStep) -> QueryResult<()> {
    if step.result_reg() >= plan.num_registers {
        return Err(QueryError::protocol(format!(
            "{} step writes register {} but the plan has {}",
            step.kind_name(),
            step.result_reg(),
            plan.num_registers
        )));
    }

    match step {
        PlanStep::Const(_) | PlanStep::VarRef(_) => {}
        PlanStep::ExternalVarRef(s) => match plan.external_vars.get(s.id) {
            Some(var) if var.name == s.name => {}
            _ => {
                return Err(QueryError::protocol(format!(
                    "reference to undeclared external variable {} (id {})",
                    s.name, s.id
                )))
            }
        },
        PlanStep::FieldStep(s) => {
            if s.field_name.is_empty() {
                return Err(QueryError::protocol("field step with empty field name"));
            }
        }
        PlanStep::ArithOp(s) => {
            if s.args.is_empty() || s.ops.chars().count() != s.args.len() {
                return Err(QueryError::protocol(format!(
                    "arithmetic step has {} arguments and operator string {:?}",
                    s.args.len(),
                    s.ops
                )));
            }
            for c in s.ops.chars() {
                let legal = match ArithOp::from_char(c) {
                    Some(op) => op.is_additive() == (s.kind == ArithKind::Additive),
                    None => false,
                };
                if !legal {
                    return Err(QueryError::protocol(format!(
                        "illegal operator {:?} in {:?} step",
                        c, s.kind
                    )));
                }
            }
        }
        PlanStep::Aggregate(s) => {
            if s.input.is_none() && s.func != super::AggregateFunc::CountStar {
                return Err(QueryError::protocol(format!(
                    "aggregate {:?} without input",
                    s.func
                )));
            }
        }
        PlanStep::Sfw(s) => {
            if !s.from.is_async() {
                return Err(QueryError::protocol("SFW from-clause must produce rows"));
            }
            if !s.select_star && s.columns.len() != s.column_names.len() {
                return Err(QueryError::protocol(format!(
                    "SFW has {} columns and {} column names",
                    s.columns.len(),
                    s.column_names.len()
                )));
            }
            if let Some(gb) = s.gb_column_count {
                if s.select_star || gb > s.columns.len() {
                    return Err(QueryError::protocol(format!(
                        "SFW grouping over {} of {} columns",
                        gb,
                        s.columns.len()
                    )));
                }
                if s.columns[gb..]
                    .iter()
                    .any(|c| !matches!(c, PlanStep::Aggregate(_)))
                {
                    return Err(QueryError::protocol(
                        "SFW non-grouping columns must be aggregate functions",
                    ));
                }
                let nested = s.columns[..gb].iter().any(contains_aggregate)
                    || s.columns[gb..]
                        .iter()
                        .flat_map(PlanStep::children)
                        .any(contains_aggregate);
                if nested {
                    return Err(QueryError::protocol(
                        "SFW aggregate functions must be top-level non-grouping columns",
                    ));
                }
            } else if s.columns.iter().any(contains_aggregate) {
                return Err(QueryError::protocol(
                    "aggregate function in a SFW without grouping",
                ));
            }
        }
        PlanStep::Group(s) => {
            if s.gb_column_count + s.aggregate_funcs.len() != s.column_names.len() {
                return Err(QueryError::protocol(format!(
                    "group step has {} grouping columns, {} aggregates and {} column names",
                    s.gb_column_count,
                    s.aggregate_funcs.len(),
                    s.column_names.len()
                )));
            }
            if !s.input.is_async() {
                return Err(QueryError::protocol("group input must produce rows"));
            }
        }
        PlanStep::Sort(s) => {
            if s.sort_specs.is_empty() {
                return Err(QueryError::protocol("sort step without sort fields"));
            }
            if !s.input.is_async() {
                return Err(QueryError::protocol("sort input must produce rows"));
            }
        }
        PlanStep::Receive(s) => {
            if s.distribution == DistributionKind::SinglePartition && !s.sort_specs.is_empty() {
                return Err(QueryError::protocol(
                    "single-partition receive cannot carry a sort specification",
                ));
            }
            if s.distribution == DistributionKind::AllShards
                && !s.sort_specs.is_empty()
                && plan.shard_ids.is_empty()
            {
                return Err(QueryError::protocol(
                    "sorted all-shards receive requires a shard topology",
                ));
            }
        }
    }

    for child in step.children() {
        if !step.is_async() && child.is_async() {
            return Err(QueryError::protocol(format!(
                "{} step cannot take a row-producing {} input",
                step.kind_name(),
                child.kind_name()
            )));
        }
        validate_step(plan, child)?;
    }
    Ok(())
}
