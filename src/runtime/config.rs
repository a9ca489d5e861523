//! Query engine configuration
//!
//! `QueryConfig` is fixed per driver; `ExecuteOptions` are per call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, QueryResult};

use super::control::CancelSignal;

/// Driver-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Rows requested per fetch for single-source and per-shard scans (default: 100)
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// Memory budget of one logical query in bytes (default: 1 GiB)
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,

    /// Upper bound on rows requested per partition fetch during a sorted
    /// all-partitions merge (default: 2048)
    #[serde(default = "default_partition_fetch_cap")]
    pub partition_fetch_cap: u32,
}

fn default_batch_limit() -> u32 {
    100
}

fn default_max_memory_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_partition_fetch_cap() -> u32 {
    2048
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            max_memory_bytes: default_max_memory_bytes(),
            partition_fetch_cap: default_partition_fetch_cap(),
        }
    }
}

impl QueryConfig {
    /// Create a config with the given fetch batch size
    pub fn with_batch_limit(batch_limit: u32) -> Self {
        Self {
            batch_limit,
            ..Default::default()
        }
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> QueryResult<Self> {
        let config: QueryConfig = serde_json::from_str(json)
            .map_err(|e| QueryError::invalid_argument(format!("invalid query config: {}", e)))?;
        if config.batch_limit == 0 || config.partition_fetch_cap == 0 {
            return Err(QueryError::invalid_argument(
                "batch_limit and partition_fetch_cap must be positive",
            ));
        }
        Ok(config)
    }
}

/// Options for one `execute` call
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Stop after this many rows; the call then returns a continuation
    pub row_limit: Option<usize>,
    /// Overrides `QueryConfig::max_memory_bytes`
    pub max_memory_bytes: Option<u64>,
    /// Bound on the whole call
    pub timeout: Option<Duration>,
    /// Aborts the in-flight fetch when signalled
    pub cancel: Option<CancelSignal>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert_eq!(config.batch_limit, 100);
        assert_eq!(config.max_memory_bytes, 1 << 30);
        assert_eq!(config.partition_fetch_cap, 2048);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = QueryConfig::from_json(r#"{"batch_limit": 5}"#).unwrap();
        assert_eq!(config.batch_limit, 5);
        assert_eq!(config.partition_fetch_cap, 2048);
    }

    #[test]
    fn test_from_json_rejects_zero_batch() {
        assert!(QueryConfig::from_json(r#"{"batch_limit": 0}"#).is_err());
        assert!(QueryConfig::from_json("not json").is_err());
    }
}
