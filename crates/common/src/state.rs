//! Transaction state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a global transaction as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
    /// Transaction is active and accepting participants
    Active,
    /// Prepare phase has started
    Preparing,
    /// All participants have voted yes
    Prepared,
    /// Commit decision is durable; commit phase in progress
    Committing,
    /// Transaction has been committed
    Committed,
    /// Rollback decision is durable; rollback phase in progress
    RollingBack,
    /// Transaction has been rolled back
    RolledBack,
    /// Some participants committed while others rolled back
    HeuristicMixed,
    /// Outcome of one or more participants is unknowable
    HeuristicHazard,
}

impl TxState {
    /// Terminal states may be removed from the log once all participants
    /// have acknowledged.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }

    /// Heuristic states are reported and retained for operator action.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, TxState::HeuristicMixed | TxState::HeuristicHazard)
    }

    /// States that a recovery pass must drive toward resolution.
    pub fn needs_recovery(&self) -> bool {
        !self.is_terminal() && !self.is_heuristic()
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Active => "ACTIVE",
            TxState::Preparing => "PREPARING",
            TxState::Prepared => "PREPARED",
            TxState::Committing => "COMMITTING",
            TxState::Committed => "COMMITTED",
            TxState::RollingBack => "ROLLING_BACK",
            TxState::RolledBack => "ROLLED_BACK",
            TxState::HeuristicMixed => "HEURISTIC_MIXED",
            TxState::HeuristicHazard => "HEURISTIC_HAZARD",
        };
        write!(f, "{}", s)
    }
}

/// Default outcome applied when a participant fails ambiguously during
/// recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeuristicDirection {
    /// Assume commit for unreachable prepared participants
    Commit,
    /// Assume rollback for unreachable prepared participants
    Rollback,
    /// Leave the record in the log for operator resolution
    Manual,
}
