//! SELECT-FROM-WHERE iterator
//!
//! Pulls rows from its from-iterator, projects them into records and
//! applies OFFSET/LIMIT. When the plan says the input arrives sorted on the
//! grouping columns, consecutive rows with equal grouping values are folded
//! into the aggregate columns and one row per group is produced.

use crate::errors::{QueryError, QueryResult};
use crate::plan::{PreparedPlan, RegisterId, SfwStep};
use crate::runtime::RuntimeControl;
use crate::value::{GroupKey, Record, Value};

use super::scalar::ScalarIter;
use super::{create_iterator, PlanIter};

pub struct SfwIter {
    result_reg: RegisterId,
    from: PlanIter,
    from_reg: RegisterId,
    columns: Vec<ScalarIter>,
    column_names: Vec<String>,
    select_star: bool,
    gb_column_count: Option<usize>,
    offset_iter: Option<ScalarIter>,
    limit_iter: Option<ScalarIter>,
    bounds: Option<(u64, Option<u64>)>,
    skipped: u64,
    produced: u64,
    /// Grouping values of the group being folded
    current_group: Option<GroupKey>,
    group_memory: u64,
    saw_input: bool,
    finished: bool,
}

impl SfwIter {
    pub fn new(step: &SfwStep, plan: &PreparedPlan) -> QueryResult<Self> {
        let columns = step
            .columns
            .iter()
            .map(ScalarIter::new)
            .collect::<QueryResult<Vec<_>>>()?;
        match step.gb_column_count {
            Some(gb) => {
                if gb > columns.len() || columns[gb..].iter().any(|c| !c.is_aggregate()) {
                    return Err(QueryError::protocol(
                        "SFW non-grouping columns must be aggregate functions",
                    ));
                }
            }
            None => {
                if columns.iter().any(ScalarIter::is_aggregate) {
                    return Err(QueryError::protocol(
                        "aggregate function in a SFW without grouping",
                    ));
                }
            }
        }
        Ok(Self {
            result_reg: step.result_reg,
            from: create_iterator(&step.from, plan)?,
            from_reg: step.from.result_reg(),
            columns,
            column_names: step.column_names.clone(),
            select_star: step.select_star,
            gb_column_count: step.gb_column_count,
            offset_iter: step.offset.as_deref().map(ScalarIter::new).transpose()?,
            limit_iter: step.limit.as_deref().map(ScalarIter::new).transpose()?,
            bounds: None,
            skipped: 0,
            produced: 0,
            current_group: None,
            group_memory: 0,
            saw_input: false,
            finished: false,
        })
    }

    pub fn result_reg(&self) -> RegisterId {
        self.result_reg
    }

    pub async fn next(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        if self.finished {
            return Ok(false);
        }
        let (offset, limit) = match self.bounds {
            Some(bounds) => bounds,
            None => {
                let offset = eval_bound(self.offset_iter.as_mut(), rcb, "OFFSET")?.unwrap_or(0);
                let limit = eval_bound(self.limit_iter.as_mut(), rcb, "LIMIT")?;
                self.bounds = Some((offset, limit));
                (offset, limit)
            }
        };

        loop {
            if limit.is_some_and(|limit| self.produced >= limit) {
                self.finished = true;
                return Ok(false);
            }
            let row = match self.gb_column_count {
                None => self.next_projected(rcb).await?,
                Some(gb) => self.next_group(gb, rcb).await?,
            };
            let Some(row) = row else {
                return Ok(false);
            };
            if self.skipped < offset {
                self.skipped += 1;
                continue;
            }
            self.produced += 1;
            rcb.set_reg(self.result_reg, row);
            return Ok(true);
        }
    }

    async fn next_projected(&mut self, rcb: &mut RuntimeControl) -> QueryResult<Option<Value>> {
        if !self.from.next(rcb).await? {
            if !rcb.needs_continuation() {
                self.finished = true;
            }
            return Ok(None);
        }
        if self.select_star {
            return Ok(Some(rcb.reg(self.from_reg).clone()));
        }
        let mut record = Record::with_capacity(self.columns.len());
        for (column, name) in self.columns.iter_mut().zip(self.column_names.iter()) {
            column.reset();
            let value = if column.next(rcb)? {
                rcb.reg(column.result_reg()).clone()
            } else {
                Value::Null
            };
            record.put(name.clone(), value);
        }
        Ok(Some(Value::Map(record)))
    }

    async fn next_group(
        &mut self,
        gb: usize,
        rcb: &mut RuntimeControl,
    ) -> QueryResult<Option<Value>> {
        loop {
            if !self.from.next(rcb).await? {
                if rcb.needs_continuation() {
                    return Ok(None);
                }
                self.finished = true;
                if let Some(key) = self.current_group.take() {
                    return self.finish_group(key, rcb).map(Some);
                }
                if gb == 0 && !self.saw_input {
                    // aggregates over no rows at all still produce one row
                    return self.finish_group(GroupKey::new(Vec::new()), rcb).map(Some);
                }
                return Ok(None);
            }
            self.saw_input = true;

            let mut values = Vec::with_capacity(gb);
            for column in self.columns[..gb].iter_mut() {
                column.reset();
                values.push(if column.next(rcb)? {
                    rcb.reg(column.result_reg()).clone()
                } else {
                    Value::Null
                });
            }
            let key = GroupKey::new(values);

            let finished = match self.current_group.take() {
                Some(current) if current == key => {
                    self.current_group = Some(current);
                    None
                }
                Some(current) => {
                    let row = self.finish_group(current, rcb)?;
                    self.current_group = Some(key);
                    Some(row)
                }
                None => {
                    self.current_group = Some(key);
                    None
                }
            };
            self.fold_row(gb, rcb)?;
            if finished.is_some() {
                return Ok(finished);
            }
        }
    }

    fn fold_row(&mut self, gb: usize, rcb: &mut RuntimeControl) -> QueryResult<()> {
        for column in self.columns[gb..].iter_mut() {
            let grown = column.aggregate_row(rcb)?;
            if grown > 0 {
                rcb.ledger().charge(grown)?;
                self.group_memory += grown;
            }
        }
        Ok(())
    }

    fn finish_group(&mut self, key: GroupKey, rcb: &RuntimeControl) -> QueryResult<Value> {
        let gb = key.values().len();
        let mut record = Record::with_capacity(self.columns.len());
        for (name, value) in self.column_names.iter().zip(key.into_values()) {
            record.put(name.clone(), value);
        }
        for (column, name) in self.columns[gb..]
            .iter_mut()
            .zip(self.column_names[gb..].iter())
        {
            let (value, _) = column.take_aggregate()?;
            record.put(name.clone(), value);
        }
        rcb.ledger().release(self.group_memory);
        self.group_memory = 0;
        Ok(Value::Map(record))
    }

    pub fn close(&mut self, rcb: &RuntimeControl) {
        rcb.ledger().release(self.group_memory);
        self.group_memory = 0;
        self.current_group = None;
        self.from.close(rcb);
    }
}

/// Evaluates an OFFSET or LIMIT expression to a non-negative integer
fn eval_bound(
    iter: Option<&mut ScalarIter>,
    rcb: &mut RuntimeControl,
    clause: &str,
) -> QueryResult<Option<u64>> {
    let Some(iter) = iter else {
        return Ok(None);
    };
    iter.reset();
    if !iter.next(rcb)? {
        return Err(QueryError::invalid_argument(format!(
            "{} expression produced no value",
            clause
        )));
    }
    match rcb.reg(iter.result_reg()).as_i64() {
        Some(n) if n >= 0 => Ok(Some(n as u64)),
        _ => Err(QueryError::invalid_argument(format!(
            "{} must be a non-negative integer, got {}",
            clause,
            rcb.reg(iter.result_reg()).type_name()
        ))),
    }
}
