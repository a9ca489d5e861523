//! Plan iterators
//!
//! Each plan step is executed by an iterator built from it. Scalar
//! iterators evaluate synchronously; row-producing iterators (SFW, Group,
//! Sort, Receive) may suspend on the single fetch of a call and are driven
//! through boxed futures so the tree can recurse.
//!
//! Contract of `next`: `Ok(true)` means a new value was written to the
//! iterator's result register; `Ok(false)` means no more values, either for
//! good or, when `RuntimeControl::needs_continuation` is set, only for this
//! call.

pub mod aggregate;
pub mod group;
pub mod scalar;
pub mod sfw;
pub mod sort;

pub use aggregate::Accumulator;
pub use group::GroupIter;
pub use scalar::ScalarIter;
pub use sfw::SfwIter;
pub use sort::SortIter;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::errors::{QueryError, QueryResult};
use crate::plan::{PlanStep, PreparedPlan, RegisterId};
use crate::receive::ReceiveIter;
use crate::runtime::RuntimeControl;

/// A row-producing iterator
pub enum PlanIter {
    Sfw(Box<SfwIter>),
    Group(Box<GroupIter>),
    Sort(Box<SortIter>),
    Receive(Box<ReceiveIter>),
}

impl PlanIter {
    pub fn result_reg(&self) -> RegisterId {
        match self {
            PlanIter::Sfw(it) => it.result_reg(),
            PlanIter::Group(it) => it.result_reg(),
            PlanIter::Sort(it) => it.result_reg(),
            PlanIter::Receive(it) => it.result_reg(),
        }
    }

    pub fn next<'a>(&'a mut self, rcb: &'a mut RuntimeControl) -> BoxFuture<'a, QueryResult<bool>> {
        match self {
            PlanIter::Sfw(it) => it.next(rcb).boxed(),
            PlanIter::Group(it) => it.next(rcb).boxed(),
            PlanIter::Sort(it) => it.next(rcb).boxed(),
            PlanIter::Receive(it) => it.next(rcb).boxed(),
        }
    }

    /// Releases every memory charge held by this subtree
    pub fn close(&mut self, rcb: &RuntimeControl) {
        match self {
            PlanIter::Sfw(it) => it.close(rcb),
            PlanIter::Group(it) => it.close(rcb),
            PlanIter::Sort(it) => it.close(rcb),
            PlanIter::Receive(it) => it.close(rcb),
        }
    }
}

/// Builds the iterator for a row-producing step
pub fn create_iterator(step: &PlanStep, plan: &PreparedPlan) -> QueryResult<PlanIter> {
    match step {
        PlanStep::Sfw(s) => Ok(PlanIter::Sfw(Box::new(SfwIter::new(s, plan)?))),
        PlanStep::Group(s) => Ok(PlanIter::Group(Box::new(GroupIter::new(s, plan)?))),
        PlanStep::Sort(s) => Ok(PlanIter::Sort(Box::new(SortIter::new(s, plan)?))),
        PlanStep::Receive(s) => Ok(PlanIter::Receive(Box::new(ReceiveIter::new(s, plan)?))),
        other => Err(QueryError::protocol(format!(
            "{} step used where rows are expected",
            other.kind_name()
        ))),
    }
}
