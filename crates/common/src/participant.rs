//! Participant contract consumed by the commit engine
//!
//! Resource managers implement this trait. Methods are synchronous: the
//! engine drives participants from its own worker tasks and a call is
//! allowed to block on network I/O. Expected outcomes (votes, recovered
//! state) are values, not errors; errors are reserved for transport-level
//! failure and heuristic damage reports.

use crate::global_id::GlobalId;
use crate::record::ParticipantRef;
use std::sync::Arc;
use thiserror::Error;

/// Prepare-phase vote from a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Participant can commit
    VoteYes,
    /// Participant refuses; transaction must roll back
    VoteNo,
}

/// State a participant reports for a transaction during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantOutcome {
    Committed,
    RolledBack,
    /// Prepared and awaiting a decision
    InDoubt,
    /// Participant has no record of the transaction
    Unknown,
}

/// Participant call failures
#[derive(Debug, Clone, Error)]
pub enum ParticipantError {
    /// Transient transport failure; the call is retried per policy
    #[error("participant unavailable: {0}")]
    Unavailable(String),

    /// Participant already rolled this branch back on its own
    #[error("participant heuristically rolled back")]
    HeuristicallyRolledBack,

    /// Participant already committed this branch on its own
    #[error("participant heuristically committed")]
    HeuristicallyCommitted,
}

/// A resource manager enlisted in a global transaction.
pub trait Participant: Send + Sync {
    /// Phase 1: vote on whether the branch can commit.
    fn prepare(&self, global_id: &GlobalId) -> Result<Vote, ParticipantError>;

    /// Phase 2: commit a prepared branch.
    fn commit(&self, global_id: &GlobalId) -> Result<(), ParticipantError>;

    /// Roll back the branch.
    fn rollback(&self, global_id: &GlobalId) -> Result<(), ParticipantError>;

    /// Report the branch outcome as the participant knows it (recovery only).
    fn recover(&self, global_id: &GlobalId) -> Result<ParticipantOutcome, ParticipantError>;
}

/// Re-derives live participant handles from durable refs at recovery time.
pub trait ParticipantResolver: Send + Sync {
    /// Returns `None` when the resource manager cannot currently be reached
    /// or is no longer configured; the caller treats that as unavailability.
    fn resolve(&self, participant: &ParticipantRef) -> Option<Arc<dyn Participant>>;
}
