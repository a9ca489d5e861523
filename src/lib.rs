//! aeroquery - client-side distributed query execution engine
//!
//! The server compiles a query into a plan of typed steps; this crate
//! interprets that plan on the client. It fans fetches out to shards and
//! partitions through the `Fetcher` collaborator, merges sorted streams,
//! groups and sorts rows within a memory budget, drops cross-shard
//! duplicates and suspends between calls behind a continuation token.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use aeroquery::{ExecuteOptions, BoundVariables, QueryConfig, QueryDriver};
//!
//! let driver = QueryDriver::new(fetcher, QueryConfig::default());
//! let mut outcome = driver
//!     .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), None)
//!     .await?;
//! while let Some(token) = outcome.continuation {
//!     outcome = driver
//!         .execute(&plan, &BoundVariables::new(), ExecuteOptions::new(), Some(&token))
//!         .await?;
//! }
//! ```

pub mod errors;
pub mod fetch;
pub mod iter;
pub mod observability;
pub mod plan;
pub mod receive;
pub mod runtime;
pub mod value;

pub use errors::{QueryError, QueryResult, Severity};
pub use fetch::{Batch, ConsumedCapacity, FetchError, FetchRequest, FetchTarget, Fetcher};
pub use plan::{PlanStep, PreparedPlan};
pub use runtime::{
    BoundVariables, CancelHandle, ContinuationToken, ExecuteOptions, QueryConfig, QueryDriver,
    QueryOutcome,
};
pub use value::{Record, Value};
