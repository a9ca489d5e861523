//! Errors raised by the fetch collaborator

use thiserror::Error;

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Failure of a network round trip
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Throttling, timeouts, security-token renewal; retry the same call
    #[error("Retryable fetch failure: {0}")]
    Retryable(String),

    /// The server rejected the protocol version; the transport will
    /// renegotiate a lower version and the call can be retried
    #[error("Protocol version mismatch: {0}")]
    ProtocolVersion(String),

    /// Non-retryable transport or server failure
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable(_) | FetchError::ProtocolVersion(_))
    }
}
