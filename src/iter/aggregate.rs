//! Aggregate accumulators
//!
//! A single accumulator type serves every aggregate function. It is fed
//! either raw column values (`aggregate`) or partial results computed by
//! the servers (`merge`), and its result can be read, overwritten and
//! taken. Collect functions report the memory they grow by so that the
//! owning iterator can charge the ledger.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::errors::QueryResult;
use crate::plan::AggregateFunc;
use crate::value::{add, compare_total_order, GroupKey, Value};

#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunc,
    result: Value,
    distinct: HashSet<GroupKey>,
    memory: u64,
}

fn initial_result(func: AggregateFunc) -> Value {
    match func {
        AggregateFunc::CountStar | AggregateFunc::Count | AggregateFunc::CountNumbers => {
            Value::Long(0)
        }
        AggregateFunc::Collect | AggregateFunc::CollectDistinct => Value::Array(Vec::new()),
        AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => Value::Empty,
    }
}

impl Accumulator {
    pub fn new(func: AggregateFunc) -> Self {
        Self {
            func,
            result: initial_result(func),
            distinct: HashSet::new(),
            memory: 0,
        }
    }

    pub fn func(&self) -> AggregateFunc {
        self.func
    }

    /// Folds one raw input value; returns the bytes the accumulator grew by
    pub fn aggregate(&mut self, value: &Value) -> QueryResult<u64> {
        match self.func {
            AggregateFunc::CountStar => self.bump(),
            AggregateFunc::Count if !value.is_null_like() => self.bump(),
            AggregateFunc::CountNumbers if value.is_numeric() => self.bump(),
            AggregateFunc::Count | AggregateFunc::CountNumbers => Ok(0),
            AggregateFunc::Sum => {
                if value.is_numeric() {
                    self.result = if self.result.is_empty() {
                        value.clone()
                    } else {
                        add(&self.result, value)?
                    };
                }
                Ok(0)
            }
            AggregateFunc::Min => {
                self.keep_extreme(value, Ordering::Less);
                Ok(0)
            }
            AggregateFunc::Max => {
                self.keep_extreme(value, Ordering::Greater);
                Ok(0)
            }
            AggregateFunc::Collect => Ok(self.collect(value)),
            AggregateFunc::CollectDistinct => Ok(self.collect_distinct(value)),
        }
    }

    /// Folds a partial result computed by a server for the same group.
    ///
    /// Counts are summed, collected arrays are appended element by element
    /// and the remaining functions re-aggregate the partial value.
    pub fn merge(&mut self, partial: &Value) -> QueryResult<u64> {
        match self.func {
            AggregateFunc::CountStar | AggregateFunc::Count | AggregateFunc::CountNumbers => {
                if partial.is_numeric() {
                    self.result = add(&self.result, partial)?;
                }
                Ok(0)
            }
            AggregateFunc::Collect | AggregateFunc::CollectDistinct => match partial {
                Value::Array(items) => {
                    let mut grown = 0;
                    for item in items {
                        grown += self.aggregate(item)?;
                    }
                    Ok(grown)
                }
                other => self.aggregate(other),
            },
            _ => self.aggregate(partial),
        }
    }

    /// Current result; `Null` when Sum/Min/Max saw no qualifying value
    pub fn result(&self) -> Value {
        if self.result.is_empty() {
            Value::Null
        } else {
            self.result.clone()
        }
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = value;
    }

    /// Returns the result and re-arms the accumulator for the next group
    pub fn take_result(&mut self) -> Value {
        let result = self.result();
        self.result = initial_result(self.func);
        self.distinct.clear();
        self.memory = 0;
        result
    }

    /// Bytes held by collected values
    pub fn memory(&self) -> u64 {
        self.memory
    }

    fn bump(&mut self) -> QueryResult<u64> {
        self.result = add(&self.result, &Value::Long(1))?;
        Ok(0)
    }

    fn keep_extreme(&mut self, value: &Value, wanted: Ordering) {
        if value.is_null_like() {
            return;
        }
        if self.result.is_empty() || compare_total_order(value, &self.result, false) == wanted {
            self.result = value.clone();
        }
    }

    fn collect(&mut self, value: &Value) -> u64 {
        if value.is_empty() {
            return 0;
        }
        let size = value.size_in_bytes();
        if let Value::Array(items) = &mut self.result {
            items.push(value.clone());
        }
        self.memory += size;
        size
    }

    fn collect_distinct(&mut self, value: &Value) -> u64 {
        if value.is_empty() {
            return 0;
        }
        let key = GroupKey::new(vec![value.clone()]);
        let key_size = key.size_in_bytes();
        if !self.distinct.insert(key) {
            return 0;
        }
        let size = value.size_in_bytes() + key_size;
        if let Value::Array(items) = &mut self.result {
            items.push(value.clone());
        }
        self.memory += size;
        size
    }
}
