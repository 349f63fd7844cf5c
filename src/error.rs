//! Error taxonomy
//!
//! Two layers of failure exist in a round:
//!
//! - [`WorkerFailure`]: one worker could not produce a value. It is always folded
//!   into that worker's outcome (`err` field) and never aborts the round.
//! - [`OracleError`]: the round could not be attempted at all, or the caller's
//!   request was unusable. These reach the caller with a machine-readable kind.

use thiserror::Error;

/// Per-worker failure, rendered into a Worker Outcome's `err` string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    /// Request body could not be encoded
    #[error("failed to marshal request: {0}")]
    Encode(String),

    /// Connection refused, reset, timed out at the transport, etc.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// Worker answered with a non-2xx status
    #[error("worker returned status {0}")]
    Status(u16),

    /// Worker answered but the body was not a Worker Outcome
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The value simulator chose to fail this task
    #[error("simulated worker failure")]
    Simulated,

    /// Dispatched but silent until the round closed
    #[error("timeout")]
    Timeout,
}

/// Round-level and caller-facing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no workers available")]
    NoWorkersAvailable,

    #[error("request {0} is already in flight")]
    DuplicateRequest(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("message queue unavailable: {0}")]
    BusUnavailable(String),
}

impl OracleError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::InvalidRequest(_) => "invalid_request",
            OracleError::NoWorkersAvailable => "no_workers_available",
            OracleError::DuplicateRequest(_) => "duplicate_request",
            OracleError::Unsupported(_) => "unsupported",
            OracleError::BusUnavailable(_) => "bus_unavailable",
        }
    }

    /// HTTP status used when this error crosses the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            OracleError::InvalidRequest(_) | OracleError::Unsupported(_) => 400,
            OracleError::DuplicateRequest(_) => 409,
            OracleError::NoWorkersAvailable | OracleError::BusUnavailable(_) => 503,
        }
    }
}
