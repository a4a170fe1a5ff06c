//! Lease-gated recovery of transaction logs

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use txlog_common::{
    GlobalId, Participant, ParticipantError, ParticipantOutcome, ParticipantResolver,
    RecoveryConfig, ServerId, TransactionRecord, TxState, Vote,
};
use txlog_engine::{Outcome, TwoPhaseCommitEngine};
use txlog_lease::LeaseManager;
use txlog_store::TransactionLogStore;

/// Summary of one recovery pass over a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions driven to COMMITTED
    pub committed: usize,
    /// Transactions driven to ROLLED_BACK
    pub rolled_back: usize,
    /// Transactions that ended in (or already carried) a heuristic state
    pub heuristic: usize,
    /// Transactions that could not reach a terminal state; retained in the
    /// log and retried on the next pass
    pub unresolved: usize,
}

impl RecoveryReport {
    fn merge(&mut self, other: RecoveryReport) {
        self.committed += other.committed;
        self.rolled_back += other.rolled_back;
        self.heuristic += other.heuristic;
        self.unresolved += other.unresolved;
    }
}

/// Re-establishes transaction state from a durable log and drives every
/// incomplete transaction to resolution.
///
/// Always lease-first: no log is opened, and no PREPARED-or-later record is
/// ever removed, unless this process holds the lease for that log.
pub struct RecoveryCoordinator {
    leases: Arc<LeaseManager>,
    log_root: PathBuf,
    resolver: Arc<dyn ParticipantResolver>,
    config: RecoveryConfig,
    /// One driver per transaction within this process
    in_recovery: DashMap<GlobalId, ()>,
}

impl RecoveryCoordinator {
    pub fn new(
        leases: Arc<LeaseManager>,
        log_root: PathBuf,
        resolver: Arc<dyn ParticipantResolver>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            leases,
            log_root,
            resolver,
            config,
            in_recovery: DashMap::new(),
        }
    }

    pub fn server(&self) -> &ServerId {
        self.leases.server()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover this server's own log at startup.
    ///
    /// Claims the local lease first; `LeaseHeld` propagates and the caller
    /// backs off (another process, possibly a peer mid-recovery, owns the
    /// log right now).
    pub async fn recover_local(&self) -> Result<RecoveryReport> {
        self.leases.acquire_own().await?;

        let server = self.leases.server().clone();
        tracing::info!(server = %server, "starting local recovery");

        let result = self.recover_log(&server).await;
        result.map_err(|e| self.escalate(e))
    }

    /// Steal a stale peer's lease and recover its abandoned log.
    ///
    /// The stolen lease is released only when the pass fully resolved the
    /// log, so the peer can reclaim it when it comes back. A failed or
    /// partial pass leaves the stolen lease in place to lapse; the server
    /// stays visible to `stale_peers` and the leftover records are retried
    /// on a later scan.
    pub async fn recover_peer(&self, target: &ServerId) -> Result<RecoveryReport> {
        self.leases.try_steal_peer_lease(target).await?;

        tracing::info!(target = %target, claimant = %self.server(), "starting peer recovery");

        let result = self.recover_log(target).await;
        match &result {
            Ok(report) if report.unresolved == 0 => {
                if let Err(e) = self.leases.release(target).await {
                    tracing::warn!(target = %target, "failed to release stolen lease: {}", e);
                }
            }
            _ => {
                tracing::warn!(
                    target = %target,
                    "peer recovery incomplete; keeping stolen lease until it lapses"
                );
            }
        }
        result.map_err(|e| self.escalate(e))
    }

    /// One background scan: find stale peers and recover each. Contention
    /// (`LeaseHeld`) is the expected outcome when another peer got there
    /// first and is not an error.
    pub async fn scan_and_recover_peers(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for target in self.leases.stale_peers().await? {
            match self.recover_peer(&target).await {
                Ok(peer_report) => report.merge(peer_report),
                Err(Error::Lease(txlog_lease::Error::LeaseHeld { holder, .. })) => {
                    tracing::debug!(target = %target, holder = %holder, "peer lease already claimed");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn recover_log(&self, server: &ServerId) -> Result<RecoveryReport> {
        let store = Arc::new(TransactionLogStore::open(
            &self.log_root,
            server.clone(),
            &self.config,
        )?);

        let mut report = RecoveryReport::default();

        for record in store.read_all()? {
            let global_id = record.global_id.clone();
            if self.in_recovery.insert(global_id.clone(), ()).is_some() {
                // Another task in this process is already driving it
                continue;
            }

            let result = self.resolve_record(&store, record).await;
            self.in_recovery.remove(&global_id);

            match result {
                Ok(resolution) => resolution.tally(&mut report),
                Err(Error::Engine(txlog_engine::Error::HeuristicHazard { global_id, state })) => {
                    return Err(Error::Fatal(format!(
                        "heuristic {} outcome for {} with hazards not accepted",
                        state, global_id
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            server = %server,
            committed = report.committed,
            rolled_back = report.rolled_back,
            heuristic = report.heuristic,
            unresolved = report.unresolved,
            "recovery pass complete"
        );

        if report.unresolved > 0 {
            tracing::warn!(
                server = %server,
                unresolved = report.unresolved,
                "transactions left unresolved; they will be retried on the next pass"
            );
        }

        Ok(report)
    }

    /// Apply the resolution policy to one recovered record.
    async fn resolve_record(
        &self,
        store: &Arc<TransactionLogStore>,
        record: TransactionRecord,
    ) -> Result<Resolution> {
        match record.state {
            // Terminal leftovers: all participants answered before the
            // crash, only the removal was lost
            TxState::Committed => {
                store.remove(&record.global_id)?;
                Ok(Resolution::Committed)
            }
            TxState::RolledBack => {
                store.remove(&record.global_id)?;
                Ok(Resolution::RolledBack)
            }

            // Heuristic damage is reported and retained for the operator
            TxState::HeuristicMixed | TxState::HeuristicHazard => {
                if self.config.log_heuristics {
                    tracing::warn!(
                        global_id = %record.global_id,
                        state = %record.state,
                        "heuristic outcome awaiting operator resolution"
                    );
                }
                Ok(Resolution::Heuristic)
            }

            // A durable commit decision exists: drive commit forward
            TxState::Prepared | TxState::Committing => {
                let mut engine = self.rebuild_engine(store, record);
                Ok(Resolution::from_commit(engine.commit().await?))
            }

            // No decision was durable: never guess commit
            TxState::Active | TxState::Preparing | TxState::RollingBack => {
                let mut engine = self.rebuild_engine(store, record);
                Ok(Resolution::from_rollback(engine.rollback().await?))
            }
        }
    }

    fn rebuild_engine(
        &self,
        store: &Arc<TransactionLogStore>,
        mut record: TransactionRecord,
    ) -> TwoPhaseCommitEngine {
        // RollingBack is re-entered through rollback(), which requires a
        // pre-decision state
        if record.state == TxState::RollingBack {
            record.state = TxState::Preparing;
        }

        let handles: Vec<Arc<dyn Participant>> = record
            .participants
            .iter()
            .map(|participant| {
                self.resolver.resolve(participant).unwrap_or_else(|| {
                    Arc::new(UnresolvedParticipant {
                        resource_id: participant.resource_id.clone(),
                    })
                })
            })
            .collect();

        TwoPhaseCommitEngine::resume(record, handles, store.clone(), self.config.clone())
    }

    fn escalate(&self, e: Error) -> Error {
        if self.config.shutdown_on_log_failure
            && matches!(e, Error::Store(txlog_store::Error::Io(_)))
        {
            Error::Fatal(e.to_string())
        } else {
            e
        }
    }
}

/// How one record was resolved.
enum Resolution {
    Committed,
    RolledBack,
    Heuristic,
    Unresolved,
}

impl Resolution {
    fn from_commit(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => Resolution::Committed,
            Outcome::Pending { .. } => Resolution::Unresolved,
            Outcome::Heuristic { .. } => Resolution::Heuristic,
        }
    }

    fn from_rollback(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => Resolution::RolledBack,
            Outcome::Pending { .. } => Resolution::Unresolved,
            Outcome::Heuristic { .. } => Resolution::Heuristic,
        }
    }

    fn tally(&self, report: &mut RecoveryReport) {
        match self {
            Resolution::Committed => report.committed += 1,
            Resolution::RolledBack => report.rolled_back += 1,
            Resolution::Heuristic => report.heuristic += 1,
            Resolution::Unresolved => report.unresolved += 1,
        }
    }
}

/// Stand-in for a participant whose resource manager cannot currently be
/// re-derived; every call reports unavailability so the normal retry and
/// heuristic machinery applies.
struct UnresolvedParticipant {
    resource_id: String,
}

impl Participant for UnresolvedParticipant {
    fn prepare(&self, _global_id: &GlobalId) -> std::result::Result<Vote, ParticipantError> {
        Err(ParticipantError::Unavailable(format!(
            "resource manager {} not resolvable",
            self.resource_id
        )))
    }

    fn commit(&self, _global_id: &GlobalId) -> std::result::Result<(), ParticipantError> {
        Err(ParticipantError::Unavailable(format!(
            "resource manager {} not resolvable",
            self.resource_id
        )))
    }

    fn rollback(&self, _global_id: &GlobalId) -> std::result::Result<(), ParticipantError> {
        Err(ParticipantError::Unavailable(format!(
            "resource manager {} not resolvable",
            self.resource_id
        )))
    }

    fn recover(
        &self,
        _global_id: &GlobalId,
    ) -> std::result::Result<ParticipantOutcome, ParticipantError> {
        Ok(ParticipantOutcome::Unknown)
    }
}
