//! Sort Engine
//!
//! Buffers its whole input (possibly over several calls), sorts it with a
//! stable sort and streams the result. Each row's memory charge is
//! released as the row is handed out.

use std::collections::VecDeque;

use crate::errors::{QueryError, QueryResult};
use crate::plan::{PreparedPlan, RegisterId, SortStep};
use crate::runtime::RuntimeControl;
use crate::value::{RowComparator, Value};

use super::{create_iterator, PlanIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortState {
    Buffering,
    Streaming,
}

pub struct SortIter {
    result_reg: RegisterId,
    input: PlanIter,
    input_reg: RegisterId,
    comparator: RowComparator,
    count_memory: bool,
    state: SortState,
    buffer: Vec<(Value, u64)>,
    sorted: VecDeque<(Value, u64)>,
    charged: u64,
}

impl SortIter {
    pub fn new(step: &SortStep, plan: &PreparedPlan) -> QueryResult<Self> {
        if step.sort_specs.is_empty() {
            return Err(QueryError::protocol("sort step without sort fields"));
        }
        Ok(Self {
            result_reg: step.result_reg,
            input: create_iterator(&step.input, plan)?,
            input_reg: step.input.result_reg(),
            comparator: RowComparator::new(step.sort_specs.clone()),
            count_memory: step.count_memory,
            state: SortState::Buffering,
            buffer: Vec::new(),
            sorted: VecDeque::new(),
            charged: 0,
        })
    }

    pub fn result_reg(&self) -> RegisterId {
        self.result_reg
    }

    pub async fn next(&mut self, rcb: &mut RuntimeControl) -> QueryResult<bool> {
        while self.state == SortState::Buffering {
            if !self.input.next(rcb).await? {
                if rcb.needs_continuation() {
                    return Ok(false);
                }
                let comparator = &self.comparator;
                // stable: equal rows keep their arrival order
                self.buffer.sort_by(|a, b| comparator.compare(&a.0, &b.0));
                self.sorted = std::mem::take(&mut self.buffer).into();
                self.state = SortState::Streaming;
                break;
            }
            let row = rcb.reg(self.input_reg).clone();
            let size = if self.count_memory {
                let size = row.size_in_bytes();
                rcb.ledger().charge(size)?;
                self.charged += size;
                size
            } else {
                0
            };
            self.buffer.push((row, size));
        }

        match self.sorted.pop_front() {
            Some((row, size)) => {
                rcb.ledger().release(size);
                self.charged = self.charged.saturating_sub(size);
                rcb.set_reg(self.result_reg, row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn close(&mut self, rcb: &RuntimeControl) {
        rcb.ledger().release(self.charged);
        self.charged = 0;
        self.buffer.clear();
        self.sorted.clear();
        self.input.close(rcb);
    }
}
