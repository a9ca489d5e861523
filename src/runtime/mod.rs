//! Query Runtime / Driver
//!
//! The driver owns one `QueryRuntime` per suspended query. A runtime holds
//! the iterator tree built from the plan and its control block; each
//! `execute` call re-enters the tree, pulls rows until the tree runs dry,
//! the row limit is reached or the single fetch of the call is spent, and
//! hands back the rows with a continuation token when more remain.

mod config;
mod continuation;
mod control;
mod driver;
mod memory;
mod query;

pub use config::{ExecuteOptions, QueryConfig};
pub use continuation::ContinuationToken;
pub use control::{CancelHandle, CancelSignal, RuntimeControl};
pub use driver::{BoundVariables, QueryDriver, QueryOutcome};
pub use memory::MemoryLedger;
pub use query::QueryRuntime;
