//! Query engine error types
//!
//! Error codes:
//! - AERO_QUERY_PROTOCOL (FATAL)
//! - AERO_QUERY_MEMORY_EXCEEDED (FATAL)
//! - AERO_QUERY_DEFECT (FATAL)
//! - AERO_QUERY_INVALID_ARGUMENT (ERROR)
//! - AERO_QUERY_INVALID_CONTINUATION (ERROR)
//! - AERO_QUERY_ARITHMETIC (ERROR)
//! - AERO_QUERY_FETCH (ERROR, retryable when the collaborator says so)
//! - AERO_QUERY_INTERRUPTED (ERROR, retryable)

use std::fmt;

use thiserror::Error;

use crate::fetch::FetchError;

/// Severity levels for query errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The call failed; the query may be retried or continued
    Error,
    /// The query cannot make progress with this client/server pair
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Errors raised while executing a query plan
#[derive(Debug, Error)]
pub enum QueryError {
    // ==================
    // Protocol shape
    // ==================
    /// Malformed plan or batch (mismatched lengths, bad codes, negative counts)
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ==================
    // Resources
    // ==================
    /// The query-wide memory budget cannot hold the buffered data
    #[error("Memory limit exceeded: {used} bytes in use, limit is {limit} bytes")]
    MemoryExceeded { used: u64, limit: u64 },

    // ==================
    // Defects
    // ==================
    /// Input did not have the shape the plan promised
    #[error("Illegal state: {0}")]
    Defect(String),

    // ==================
    // User errors
    // ==================
    /// Bad bind variables, offsets, limits
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown, stale or malformed continuation token
    #[error("Invalid continuation: {0}")]
    InvalidContinuation(String),

    // ==================
    // Arithmetic
    // ==================
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Type error: {0}")]
    Type(String),

    // ==================
    // Transient
    // ==================
    /// Raised by the fetch collaborator, passed through untouched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Query call cancelled")]
    Cancelled,

    #[error("Query call timed out after {0} ms")]
    Timeout(u128),
}

impl QueryError {
    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Create a defect error
    pub fn defect(reason: impl Into<String>) -> Self {
        Self::Defect(reason.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Create a type error
    pub fn type_error(reason: impl Into<String>) -> Self {
        Self::Type(reason.into())
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "AERO_QUERY_PROTOCOL",
            Self::MemoryExceeded { .. } => "AERO_QUERY_MEMORY_EXCEEDED",
            Self::Defect(_) => "AERO_QUERY_DEFECT",
            Self::InvalidArgument(_) => "AERO_QUERY_INVALID_ARGUMENT",
            Self::InvalidContinuation(_) => "AERO_QUERY_INVALID_CONTINUATION",
            Self::DivisionByZero | Self::Overflow(_) | Self::Type(_) => "AERO_QUERY_ARITHMETIC",
            Self::Fetch(_) => "AERO_QUERY_FETCH",
            Self::Cancelled | Self::Timeout(_) => "AERO_QUERY_INTERRUPTED",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            Self::Protocol(_) | Self::MemoryExceeded { .. } | Self::Defect(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether repeating the same call with the same continuation can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Cancelled | Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
