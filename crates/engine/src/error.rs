//! Error types for the commit engine

use thiserror::Error;
use txlog_common::{GlobalId, TxState};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Commit engine error types
#[derive(Debug, Error)]
pub enum Error {
    /// The write-ahead log write failed; the gated external action was not
    /// performed
    #[error("transaction log failure: {0}")]
    Store(#[from] txlog_store::Error),

    /// Operation is not legal in the transaction's current state
    /// (programmer error, rejected immediately)
    #[error("protocol violation for {global_id}: {operation} in state {state}")]
    ProtocolViolation {
        global_id: GlobalId,
        operation: &'static str,
        state: TxState,
    },

    /// A heuristic hazard occurred and the configuration does not accept
    /// continued operation
    #[error("heuristic {state} outcome for {global_id} and hazards are not accepted")]
    HeuristicHazard { global_id: GlobalId, state: TxState },
}
