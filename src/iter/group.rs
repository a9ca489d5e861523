//! Group Engine
//!
//! Hash group-by over rows that already carry per-shard partial aggregates.
//! Grouping columns come first in each input record, aggregate columns
//! follow. Without aggregate columns the iterator is a streaming DISTINCT:
//! each new key is emitted as soon as it is seen. With aggregates it
//! consumes its whole input (possibly over several calls) before emitting.
//!
//! A missing or absent grouping value becomes SQL null in a DISTINCT
//! without aggregates; otherwise the row is skipped.

use std::collections::{HashMap, VecDeque};

use crate::errors::{QueryError, QueryResult};
use crate::plan::{AggregateFunc, GroupStep, PreparedPlan, RegisterId};
use crate::runtime::RuntimeControl;
use crate::value::{GroupKey, Record, Value};

use super::aggregate::Accumulator;
use super::{create_iterator, PlanIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Consuming,
    Emitting,
    Done,
}

struct GroupEntry {
    accumulators: Vec<Accumulator>,
    /// Bytes charged for the key and the accumulators
    memory: u64,
}

pub struct GroupIter {
    result_reg: RegisterId,
    input: PlanIter,
    input_reg: RegisterId,
    gb_column_count: usize,
    column_names: Vec<String>,
    aggregate_funcs: Vec<AggregateFunc>,
    is_distinct: bool,
    remove_produced_result: bool,
    count_memory: bool,
    state: GroupState,
    groups: HashMap<GroupKey, GroupEntry>,
    /// Keys in first-seen order, drained while emitting
    order: VecDeque<GroupKey>,
    charged: u64,
}

impl GroupIter {
    pub fn new(step: &GroupStep, plan: &PreparedPlan) -> QueryResult<Self> {
        if step.gb_column_count + step.aggregate_funcs.len() != step.column_names.len() {
            return Err(QueryError::protocol(
                "group column names do not match grouping and aggregate columns",
            ));
        }
        Ok(Self {
            result_reg: step.result_reg,
            input: create_iterator(&step.input, plan)?,
            input_reg: step.input.result_reg(),
            gb_column_count: step.gb_column_count,
            column_names: step.column_names.clone(),
            aggregate_funcs: step.aggregate_funcs.clone(),
            is_distinct: step.is_distinct,
            remove_produced_result: step.remove_produced_result,
            count_memory: step.count_memory,
            state: GroupState::Consuming,
            groups: HashMap::new(),
            order: VecDeque::new(),
            charged: 0,
        })
    }

    pub fn result_reg(&self) -> RegisterId {
        self.result_reg
    }

    pub async fn next(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        loop {
            match self.state {
                GroupState::Done => return Ok(false),
                GroupState::Emitting => return self.emit(rcb),
                GroupState::Consuming => {
                    if !self.input.next(rcb).await? {
                        if rcb.needs_continuation() {
                            return Ok(false);
                        }
                        if self.aggregate_funcs.is_empty() {
                            self.state = GroupState::Done;
                            return Ok(false);
                        }
                        if self.groups.is_empty() && self.gb_column_count == 0 {
                            // aggregates over no rows at all still produce one row
                            let key = GroupKey::new(Vec::new());
                            self.insert_group(key, rcb)?;
                        }
                        self.state = GroupState::Emitting;
                        continue;
                    }
                    if self.consume_row(rcb)? {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Folds the current input row; returns true when a new distinct key was
    /// written to the result register
    fn consume_row(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        let record = match rcb.reg(self.input_reg) {
            Value::Map(record) => record,
            other => {
                return Err(QueryError::defect(format!(
                    "group input must be a record, got {}",
                    other.type_name()
                )))
            }
        };

        let mut values = Vec::with_capacity(self.gb_column_count);
        for name in &self.column_names[..self.gb_column_count] {
            match record.get(name) {
                None | Some(Value::Empty) => {
                    if self.is_distinct && self.aggregate_funcs.is_empty() {
                        values.push(Value::Null);
                    } else {
                        return Ok(false);
                    }
                }
                Some(value) => values.push(value.clone()),
            }
        }
        let partials: Vec<Value> = self.column_names[self.gb_column_count..]
            .iter()
            .map(|name| record.get(name).cloned().unwrap_or(Value::Empty))
            .collect();
        let key = GroupKey::new(values);

        if self.aggregate_funcs.is_empty() {
            if self.groups.contains_key(&key) {
                return Ok(false);
            }
            let row = self.make_row(key.values(), Vec::new());
            self.insert_group(key, rcb)?;
            rcb.set_reg(self.result_reg, row);
            return Ok(true);
        }

        if !self.groups.contains_key(&key) {
            self.insert_group(key.clone(), rcb)?;
        }
        let mut grown = 0;
        if let Some(entry) = self.groups.get_mut(&key) {
            for (acc, partial) in entry.accumulators.iter_mut().zip(partials.iter()) {
                grown += acc.merge(partial)?;
            }
        }
        if grown > 0 && self.count_memory {
            rcb.ledger().charge(grown)?;
            self.charged += grown;
            if let Some(entry) = self.groups.get_mut(&key) {
                entry.memory += grown;
            }
        }
        Ok(false)
    }

    fn insert_group(&mut self, key: GroupKey, rcb: &RuntimeControl) -> QueryResult<()> {
        let memory = if self.count_memory {
            let size = key.size_in_bytes();
            rcb.ledger().charge(size)?;
            self.charged += size;
            size
        } else {
            0
        };
        let accumulators = self
            .aggregate_funcs
            .iter()
            .map(|func| Accumulator::new(*func))
            .collect();
        if !self.aggregate_funcs.is_empty() {
            self.order.push_back(key.clone());
        }
        self.groups.insert(
            key,
            GroupEntry {
                accumulators,
                memory,
            },
        );
        Ok(())
    }

    fn emit(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        let Some(key) = self.order.pop_front() else {
            self.state = GroupState::Done;
            return Ok(false);
        };
        let results: Vec<Value> = match self.groups.get(&key) {
            Some(entry) => entry.accumulators.iter().map(Accumulator::result).collect(),
            None => return Err(QueryError::defect("emitted group has no entry")),
        };
        let row = self.make_row(key.values(), results);
        if self.remove_produced_result {
            if let Some(entry) = self.groups.remove(&key) {
                rcb.ledger().release(entry.memory);
                self.charged = self.charged.saturating_sub(entry.memory);
            }
        }
        rcb.set_reg(self.result_reg, row);
        Ok(true)
    }

    fn make_row(&self, keys: &[Value], results: Vec<Value>) -> Value {
        let mut record = Record::with_capacity(self.column_names.len());
        let values = keys.iter().cloned().chain(results);
        for (name, value) in self.column_names.iter().zip(values) {
            record.put(name.clone(), value);
        }
        Value::Map(record)
    }

    pub fn close(&mut self, rcb: &RuntimeControl) {
        rcb.ledger().release(self.charged);
        self.charged = 0;
        self.groups.clear();
        self.order.clear();
        self.state = GroupState::Done;
        self.input.close(rcb);
    }
}
