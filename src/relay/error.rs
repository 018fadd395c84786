//! Relay error types.

use thiserror::Error;

use crate::upstream::UpstreamError;

/// Errors surfaced to relay callers.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No upstream with this name is configured.
    #[error("unknown upstream '{0}'")]
    UnknownUpstream(String),

    /// Connect, auth or transmit failure; never retried.
    #[error(transparent)]
    Connection(#[from] UpstreamError),

    /// The upstream ended the call with an error event.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// No terminal event within the allowed time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The caller's input was rejected before any upstream work.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A fire-and-forget forward failed.
    #[error("forward failed: {0}")]
    Forward(String),

    /// Startup wiring failed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
