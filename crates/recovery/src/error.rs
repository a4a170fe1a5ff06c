//! Error types for the recovery coordinator

use thiserror::Error;

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Recovery error types
#[derive(Debug, Error)]
pub enum Error {
    /// Lease could not be obtained or the lease store failed
    #[error(transparent)]
    Lease(#[from] txlog_lease::Error),

    /// The transaction log could not be read or written
    #[error(transparent)]
    Store(#[from] txlog_store::Error),

    /// The commit engine failed while re-driving a transaction
    #[error(transparent)]
    Engine(#[from] txlog_engine::Error),

    /// Unrecoverable condition under the shutdown-on-log-failure policy;
    /// the process should halt cleanly rather than mask corruption
    #[error("fatal recovery failure: {0}")]
    Fatal(String),
}
