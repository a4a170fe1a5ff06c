//! Error types for lease management

use thiserror::Error;
use txlog_common::ServerId;

/// Result type for lease operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lease error types
#[derive(Debug, Error)]
pub enum Error {
    /// Lease store is unreachable or failed
    #[error("lease store I/O failure: {0}")]
    Io(String),

    /// Expected contention outcome: someone else holds a live lease.
    /// Callers back off; this is not a failure.
    #[error("lease for {server} held by {holder}")]
    LeaseHeld { server: ServerId, holder: ServerId },

    /// No lease record exists for the requested server
    #[error("no lease record for {0}")]
    NotFound(ServerId),
}

impl From<fjall::Error> for Error {
    fn from(e: fjall::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
