//! Error types for the transaction log store

use thiserror::Error;

/// Result type for log store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Log store error types
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying storage is unavailable or failed
    #[error("log store I/O failure: {0}")]
    Io(#[from] fjall::Error),

    /// A persisted record could not be decoded
    #[error("log record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The configured log size is exhausted and rotation freed nothing
    #[error("transaction log full: {size} records at configured bound")]
    LogFull { size: u64 },

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Other(e.to_string())
    }
}
