//! Observability for the query engine
//!
//! - Structured logging through `tracing`, one typed `Event` per line
//! - Relaxed atomic counters per driver
//!
//! Observability is read-only: nothing here changes execution. The host
//! application installs whatever `tracing` subscriber it wants.

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsSnapshot, QueryMetrics};
