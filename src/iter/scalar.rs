//! Scalar iterators
//!
//! Synchronous evaluators for expression steps. Each produces at most one
//! value per `reset`: `next` writes it to the result register and returns
//! true, or returns false when the expression has no value.

use crate::errors::{QueryError, QueryResult};
use crate::plan::{AggregateFunc, ArithKind, PlanStep, RegisterId};
use crate::runtime::RuntimeControl;
use crate::value::{ArithOp, Value};

use super::aggregate::Accumulator;

#[derive(Debug)]
enum ScalarKind {
    Const(Value),
    /// The variable's value is already in the result register
    VarRef,
    ExternalVarRef {
        id: usize,
        name: String,
    },
    Field {
        input: Box<ScalarIter>,
        field_name: String,
    },
    Arith {
        kind: ArithKind,
        args: Vec<ScalarIter>,
        ops: Vec<ArithOp>,
    },
    Aggregate {
        acc: Accumulator,
        input: Option<Box<ScalarIter>>,
    },
}

#[derive(Debug)]
pub struct ScalarIter {
    result_reg: RegisterId,
    kind: ScalarKind,
    done: bool,
}

impl ScalarIter {
    pub fn new(step: &PlanStep) -> QueryResult<Self> {
        let kind = match step {
            PlanStep::Const(s) => ScalarKind::Const(s.value.clone()),
            PlanStep::VarRef(_) => ScalarKind::VarRef,
            PlanStep::ExternalVarRef(s) => ScalarKind::ExternalVarRef {
                id: s.id,
                name: s.name.clone(),
            },
            PlanStep::FieldStep(s) => ScalarKind::Field {
                input: Box::new(ScalarIter::new(&s.input)?),
                field_name: s.field_name.clone(),
            },
            PlanStep::ArithOp(s) => {
                let ops = s
                    .ops
                    .chars()
                    .map(|c| {
                        ArithOp::from_char(c).ok_or_else(|| {
                            QueryError::protocol(format!("illegal arithmetic operator {:?}", c))
                        })
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                if ops.len() != s.args.len() {
                    return Err(QueryError::protocol(format!(
                        "{} operators for {} arithmetic arguments",
                        ops.len(),
                        s.args.len()
                    )));
                }
                ScalarKind::Arith {
                    kind: s.kind,
                    args: s.args.iter().map(ScalarIter::new).collect::<QueryResult<_>>()?,
                    ops,
                }
            }
            PlanStep::Aggregate(s) => ScalarKind::Aggregate {
                acc: Accumulator::new(s.func),
                input: match &s.input {
                    Some(input) => Some(Box::new(ScalarIter::new(input)?)),
                    None if s.func == AggregateFunc::CountStar => None,
                    None => {
                        return Err(QueryError::protocol(format!(
                            "aggregate {:?} without input",
                            s.func
                        )))
                    }
                },
            },
            other => {
                return Err(QueryError::protocol(format!(
                    "{} step used where a scalar is expected",
                    other.kind_name()
                )))
            }
        };
        Ok(Self {
            result_reg: step.result_reg(),
            kind,
            done: false,
        })
    }

    pub fn result_reg(&self) -> RegisterId {
        self.result_reg
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, ScalarKind::Aggregate { .. })
    }

    /// Re-arms the iterator (and its inputs) for the next input row
    pub fn reset(&mut self) {
        self.done = false;
        match &mut self.kind {
            ScalarKind::Field { input, .. } => input.reset(),
            ScalarKind::Arith { args, .. } => args.iter_mut().for_each(ScalarIter::reset),
            ScalarKind::Aggregate {
                input: Some(input), ..
            } => input.reset(),
            _ => {}
        }
    }

    pub fn next(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        if self.done {
            return Ok(false);
        }
        self.done = true;

        let value = match &mut self.kind {
            ScalarKind::Const(value) => value.clone(),
            ScalarKind::VarRef => return Ok(true),
            ScalarKind::ExternalVarRef { id, name } => rcb.external_var(*id, name)?.clone(),
            ScalarKind::Field { input, field_name } => {
                if !input.next(rcb)? {
                    return Ok(false);
                }
                match rcb.reg(input.result_reg()) {
                    Value::Map(record) => match record.get(field_name) {
                        None | Some(Value::Empty) => return Ok(false),
                        Some(value) => value.clone(),
                    },
                    Value::Null | Value::JsonNull | Value::Empty => return Ok(false),
                    other => {
                        return Err(QueryError::defect(format!(
                            "field step {} applied to a {} value",
                            field_name,
                            other.type_name()
                        )))
                    }
                }
            }
            ScalarKind::Arith { kind, args, ops } => {
                let mut acc = match kind {
                    ArithKind::Additive => Value::Integer(0),
                    ArithKind::Multiplicative => Value::Integer(1),
                };
                for (arg, op) in args.iter_mut().zip(ops.iter()) {
                    arg.reset();
                    if !arg.next(rcb)? {
                        return Ok(false);
                    }
                    let operand = rcb.reg(arg.result_reg());
                    match operand {
                        Value::Empty => return Ok(false),
                        Value::Null | Value::JsonNull => {
                            acc = Value::Null;
                            break;
                        }
                        _ => acc = op.apply(&acc, operand)?,
                    }
                }
                acc
            }
            ScalarKind::Aggregate { acc, .. } => acc.result(),
        };
        rcb.set_reg(self.result_reg, value);
        Ok(true)
    }

    /// Folds the current row into an aggregate iterator; returns the bytes
    /// its accumulator grew by
    pub fn aggregate_row(&mut self, rcb: &mut RuntimeControl) -> QueryResult<u64> {
        match &mut self.kind {
            ScalarKind::Aggregate { acc, input } => match input {
                Some(input) => {
                    input.reset();
                    if input.next(rcb)? {
                        acc.aggregate(rcb.reg(input.result_reg()))
                    } else {
                        acc.aggregate(&Value::Empty)
                    }
                }
                None => acc.aggregate(&Value::Empty),
            },
            _ => Err(QueryError::defect("aggregate_row on a non-aggregate iterator")),
        }
    }

    /// Takes the aggregate result and re-arms the accumulator; returns the
    /// result and the bytes the accumulator held
    pub fn take_aggregate(&mut self) -> QueryResult<(Value, u64)> {
        match &mut self.kind {
            ScalarKind::Aggregate { acc, .. } => {
                let memory = acc.memory();
                Ok((acc.take_result(), memory))
            }
            _ => Err(QueryError::defect("take_aggregate on a non-aggregate iterator")),
        }
    }
}
