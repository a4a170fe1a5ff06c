//! The two-phase-commit engine proper

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use txlog_common::{
    GlobalId, GlobalIdGenerator, HeuristicDirection, Participant, ParticipantError,
    ParticipantOutcome, ParticipantRef, RecoveryConfig, TransactionRecord, TxState, Vote,
};
use txlog_store::TransactionLogStore;

/// Result of driving a commit or rollback phase to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every participant acknowledged; the record was removed from the log
    Completed,
    /// Some participants stayed unreachable; the record keeps its durable
    /// in-progress state for the recovery coordinator to re-drive
    Pending { remaining: usize },
    /// The transaction ended in a heuristic state; the record is retained
    /// and reported, never silently reclassified
    Heuristic { state: TxState },
}

/// Drives one global transaction through two-phase commit.
///
/// Each engine instance owns its record exclusively (`&mut self` mutation);
/// no two tasks ever drive the same transaction concurrently. The log write
/// for a state transition always precedes the participant calls that
/// transition authorizes.
pub struct TwoPhaseCommitEngine {
    record: TransactionRecord,
    handles: Vec<Arc<dyn Participant>>,
    store: Arc<TransactionLogStore>,
    config: RecoveryConfig,
    recovering: bool,
}

impl TwoPhaseCommitEngine {
    /// Begin a new transaction. The ACTIVE record is durable before this
    /// returns.
    pub fn begin(
        generator: &GlobalIdGenerator,
        store: Arc<TransactionLogStore>,
        config: RecoveryConfig,
    ) -> Result<Self> {
        let record = TransactionRecord::new(
            generator.next_id(),
            config.heuristic_completion_direction,
        );
        store.append(&record)?;

        Ok(Self {
            record,
            handles: Vec::new(),
            store,
            config,
            recovering: false,
        })
    }

    /// Rebuild an engine around a record read back from the log during
    /// recovery. `handles` must parallel the record's participant list.
    pub fn resume(
        record: TransactionRecord,
        handles: Vec<Arc<dyn Participant>>,
        store: Arc<TransactionLogStore>,
        config: RecoveryConfig,
    ) -> Self {
        debug_assert_eq!(record.participants.len(), handles.len());
        Self {
            record,
            handles,
            store,
            config,
            recovering: true,
        }
    }

    pub fn global_id(&self) -> &GlobalId {
        &self.record.global_id
    }

    pub fn state(&self) -> TxState {
        self.record.state
    }

    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    /// Register a participant. Only legal while the transaction is ACTIVE.
    pub fn enlist(
        &mut self,
        participant: ParticipantRef,
        handle: Arc<dyn Participant>,
    ) -> Result<()> {
        if self.record.state != TxState::Active {
            return Err(self.violation("enlist"));
        }
        self.record.participants.push(participant);
        self.handles.push(handle);
        Ok(())
    }

    /// Phase 1: collect votes.
    ///
    /// With exactly one participant and the one-phase optimization enabled,
    /// no prepare call is made at all; the transaction moves straight to
    /// PREPARED and the single resource decides at commit time. Any no-vote
    /// or unreachable participant rolls the transaction back before this
    /// returns `VoteNo`.
    pub async fn prepare_all(&mut self) -> Result<Vote> {
        if self.record.state != TxState::Active {
            return Err(self.violation("prepare"));
        }

        // Nothing enlisted: nothing external to decide
        if self.handles.is_empty() {
            self.finish_terminal(TxState::Committed)?;
            return Ok(Vote::VoteYes);
        }

        if self.handles.len() == 1 && self.config.one_pc_optimization {
            self.transition(TxState::Prepared)?;
            return Ok(Vote::VoteYes);
        }

        self.transition(TxState::Preparing)?;

        let policy = RetryPolicy::new(
            self.config.lightweight_retry_time,
            self.config.lightweight_retry_attempts,
        );

        // Arc clones, so a failing vote can hand control to drive_rollback
        let handles = self.handles.clone();
        for (index, handle) in handles.iter().enumerate() {
            let global_id = self.record.global_id.clone();
            match policy.run(|| handle.prepare(&global_id)).await {
                Ok(Vote::VoteYes) => {}
                Ok(Vote::VoteNo) | Err(ParticipantError::Unavailable(_)) => {
                    tracing::debug!(
                        global_id = %self.record.global_id,
                        participant = %self.record.participants[index].resource_id,
                        "prepare vote no, rolling back"
                    );
                    self.drive_rollback().await?;
                    return Ok(Vote::VoteNo);
                }
                Err(ParticipantError::HeuristicallyRolledBack) => {
                    // Branch is already gone; roll back the rest
                    self.drive_rollback().await?;
                    return Ok(Vote::VoteNo);
                }
                Err(ParticipantError::HeuristicallyCommitted) => {
                    // A branch committed before any decision existed
                    return self
                        .finish_heuristic(TxState::HeuristicHazard)
                        .map(|_| Vote::VoteNo);
                }
            }
        }

        self.transition(TxState::Prepared)?;
        Ok(Vote::VoteYes)
    }

    /// Phase 2: commit.
    ///
    /// Legal from PREPARED, or from COMMITTING when re-driven by recovery.
    /// COMMITTING is durable before any participant sees `commit`; once that
    /// write succeeds the decision is irrevocable and partial failures leave
    /// the record in place rather than rolling anyone back.
    pub async fn commit(&mut self) -> Result<Outcome> {
        if !matches!(self.record.state, TxState::Prepared | TxState::Committing) {
            return Err(self.violation("commit"));
        }

        // Write-ahead: no participant may be called unless this write held
        self.transition(TxState::Committing)?;

        let policy = RetryPolicy::new(
            self.config.standard_retry_time,
            self.config.standard_retry_attempts,
        );

        let mut heuristic_rollbacks = 0usize;
        let mut committed = 0usize;
        let mut unreachable = 0usize;

        for (index, handle) in self.handles.iter().enumerate() {
            let global_id = self.record.global_id.clone();

            // During recovery, ask the participant what it already knows
            // before re-driving the branch
            if self.recovering {
                match handle.recover(&global_id) {
                    Ok(ParticipantOutcome::Committed) => {
                        committed += 1;
                        continue;
                    }
                    Ok(ParticipantOutcome::RolledBack) => {
                        tracing::warn!(
                            global_id = %self.record.global_id,
                            participant = %self.record.participants[index].resource_id,
                            "recovered participant rolled back against a commit decision"
                        );
                        heuristic_rollbacks += 1;
                        continue;
                    }
                    // In doubt, forgotten, or unreachable: fall through to
                    // the commit call
                    Ok(_) | Err(_) => {}
                }
            }

            match policy.run(|| handle.commit(&global_id)).await {
                Ok(()) | Err(ParticipantError::HeuristicallyCommitted) => committed += 1,
                Err(ParticipantError::HeuristicallyRolledBack) => {
                    tracing::warn!(
                        global_id = %self.record.global_id,
                        participant = %self.record.participants[index].resource_id,
                        "participant heuristically rolled back against a commit decision"
                    );
                    heuristic_rollbacks += 1;
                }
                Err(ParticipantError::Unavailable(reason)) => {
                    tracing::warn!(
                        global_id = %self.record.global_id,
                        participant = %self.record.participants[index].resource_id,
                        reason = %reason,
                        "participant unreachable during commit"
                    );
                    unreachable += 1;
                }
            }
        }

        if heuristic_rollbacks > 0 {
            let state = if committed > 0 {
                TxState::HeuristicMixed
            } else {
                TxState::HeuristicHazard
            };
            return self.finish_heuristic(state);
        }

        if unreachable > 0 {
            return self.defer_unreachable(unreachable);
        }

        self.finish_terminal(TxState::Committed)?;
        Ok(Outcome::Completed)
    }

    /// Roll back. Legal in any state before the commit decision became
    /// durable.
    pub async fn rollback(&mut self) -> Result<Outcome> {
        if matches!(
            self.record.state,
            TxState::Committing | TxState::Committed | TxState::RolledBack
        ) {
            return Err(self.violation("rollback"));
        }
        self.drive_rollback().await
    }

    /// Write ROLLING_BACK, roll back every enlisted participant. No
    /// cross-participant ordering is required for rollback.
    async fn drive_rollback(&mut self) -> Result<Outcome> {
        self.transition(TxState::RollingBack)?;

        let policy = RetryPolicy::new(
            self.config.standard_retry_time,
            self.config.standard_retry_attempts,
        );

        let mut heuristic_commits = 0usize;
        let mut unreachable = 0usize;

        for (index, handle) in self.handles.iter().enumerate() {
            let global_id = self.record.global_id.clone();
            match policy.run(|| handle.rollback(&global_id)).await {
                Ok(()) | Err(ParticipantError::HeuristicallyRolledBack) => {}
                Err(ParticipantError::HeuristicallyCommitted) => {
                    tracing::warn!(
                        global_id = %self.record.global_id,
                        participant = %self.record.participants[index].resource_id,
                        "participant heuristically committed against a rollback decision"
                    );
                    heuristic_commits += 1;
                }
                Err(ParticipantError::Unavailable(_)) => unreachable += 1,
            }
        }

        if heuristic_commits > 0 {
            return self.finish_heuristic(TxState::HeuristicMixed);
        }

        if unreachable > 0 {
            // Record stays ROLLING_BACK; retried on the next recovery pass
            tracing::warn!(
                global_id = %self.record.global_id,
                remaining = unreachable,
                "rollback incomplete, deferring to recovery"
            );
            return Ok(Outcome::Pending {
                remaining: unreachable,
            });
        }

        self.finish_terminal(TxState::RolledBack)?;
        Ok(Outcome::Completed)
    }

    /// Participants stayed unreachable after bounded retries during commit.
    ///
    /// In normal operation the record simply keeps its COMMITTING state for
    /// the recovery coordinator. During a recovery pass the configured
    /// heuristic direction applies: Manual retains the record for the next
    /// pass; Rollback presumes the unreachable branches rolled back against
    /// the durable commit decision (a known divergence); Commit presumes
    /// they committed, an outcome that can never be verified.
    fn defer_unreachable(&mut self, remaining: usize) -> Result<Outcome> {
        if !self.recovering
            || self.record.heuristic_direction == HeuristicDirection::Manual
        {
            tracing::warn!(
                global_id = %self.record.global_id,
                remaining,
                "commit incomplete, deferring to recovery"
            );
            return Ok(Outcome::Pending { remaining });
        }

        let state = match self.record.heuristic_direction {
            HeuristicDirection::Rollback => TxState::HeuristicMixed,
            _ => TxState::HeuristicHazard,
        };
        self.finish_heuristic(state)
    }

    /// Record a heuristic outcome: durable, reported, retained.
    fn finish_heuristic(&mut self, state: TxState) -> Result<Outcome> {
        self.transition(state)?;

        if self.config.log_heuristics {
            tracing::warn!(
                global_id = %self.record.global_id,
                state = %state,
                "transaction resolved heuristically"
            );
        }

        if !self.config.accept_heuristic_hazard {
            return Err(Error::HeuristicHazard {
                global_id: self.record.global_id.clone(),
                state,
            });
        }

        Ok(Outcome::Heuristic { state })
    }

    /// Durably move the record to `state` (write-ahead for the calls that
    /// follow).
    fn transition(&mut self, state: TxState) -> Result<()> {
        self.record.transition(state);
        self.store.append(&self.record)?;
        Ok(())
    }

    /// Terminal states are removal, not a rewrite: a crash before the remove
    /// leaves the prior in-progress state, which recovery re-drives
    /// idempotently.
    fn finish_terminal(&mut self, state: TxState) -> Result<()> {
        self.record.transition(state);
        self.store.remove(&self.record.global_id)?;
        Ok(())
    }

    fn violation(&self, operation: &'static str) -> Error {
        Error::ProtocolViolation {
            global_id: self.record.global_id.clone(),
            operation,
            state: self.record.state,
        }
    }
}
