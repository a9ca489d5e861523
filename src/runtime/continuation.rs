//! Continuation tokens
//!
//! A token names the runtime-held state of a suspended query: the query id
//! and the number of calls already answered. Presenting an older token
//! than the latest one issued is rejected.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{QueryError, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub query_id: Uuid,
    pub sequence: u64,
}

impl ContinuationToken {
    pub fn new(query_id: Uuid, sequence: u64) -> Self {
        Self { query_id, sequence }
    }

    /// Opaque string form handed to callers
    pub fn encode(&self) -> String {
        // a uuid and an integer always serialize
        STANDARD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn parse(encoded: &str) -> QueryResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| QueryError::InvalidContinuation(format!("not base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::InvalidContinuation(format!("undecodable token: {}", e)))
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
