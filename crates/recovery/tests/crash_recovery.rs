//! Crash-recovery scenarios
//!
//! Each test seeds a durable log with the record a crashed process would
//! have left behind, then runs a recovery pass against it and checks that
//! every transaction reaches a terminal or reported state.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use txlog_common::{
    GlobalId, HeuristicDirection, Participant, ParticipantError, ParticipantOutcome,
    ParticipantRef, ParticipantResolver, RecoveryConfig, ServerId, TransactionRecord, TxState,
    Vote,
};
use txlog_lease::{LeaseManager, LeaseStore, MemoryLeaseStore, StoredLease};
use txlog_recovery::{Error, RecoveryCoordinator};
use txlog_store::TransactionLogStore;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Normal,
    Unavailable,
    /// recover() reports the branch already committed
    AlreadyCommitted,
}

struct MockParticipant {
    behavior: Behavior,
    commits: AtomicU32,
    rollbacks: AtomicU32,
}

impl MockParticipant {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            commits: AtomicU32::new(0),
            rollbacks: AtomicU32::new(0),
        })
    }
}

impl Participant for MockParticipant {
    fn prepare(&self, _global_id: &GlobalId) -> Result<Vote, ParticipantError> {
        Ok(Vote::VoteYes)
    }

    fn commit(&self, _global_id: &GlobalId) -> Result<(), ParticipantError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Unavailable => Err(ParticipantError::Unavailable("down".into())),
            _ => Ok(()),
        }
    }

    fn rollback(&self, _global_id: &GlobalId) -> Result<(), ParticipantError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Unavailable => Err(ParticipantError::Unavailable("down".into())),
            _ => Ok(()),
        }
    }

    fn recover(&self, _global_id: &GlobalId) -> Result<ParticipantOutcome, ParticipantError> {
        match self.behavior {
            Behavior::AlreadyCommitted => Ok(ParticipantOutcome::Committed),
            _ => Ok(ParticipantOutcome::Unknown),
        }
    }
}

/// Resolver over a fixed set of resource managers
struct MapResolver {
    participants: Mutex<HashMap<String, Arc<dyn Participant>>>,
}

impl MapResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            participants: Mutex::new(HashMap::new()),
        })
    }

    fn insert(&self, resource_id: &str, participant: Arc<dyn Participant>) {
        self.participants
            .lock()
            .insert(resource_id.to_string(), participant);
    }
}

impl ParticipantResolver for MapResolver {
    fn resolve(&self, participant: &ParticipantRef) -> Option<Arc<dyn Participant>> {
        self.participants
            .lock()
            .get(&participant.resource_id)
            .cloned()
    }
}

fn test_config() -> RecoveryConfig {
    RecoveryConfig::default()
        .with_standard_retry(Duration::from_millis(2), 1)
        .with_lightweight_retry(Duration::from_millis(2), 1)
        .with_lease_timing(Duration::from_millis(500), Duration::from_millis(50))
        .with_peer_time_before_stale(Duration::from_millis(1))
}

/// Seed `server`'s log with a record a crashed process left behind. The
/// store handle is dropped before returning so recovery can reopen the
/// keyspace.
fn seed_record(
    root: &Path,
    server: &str,
    config: &RecoveryConfig,
    state: TxState,
    resources: &[&str],
) -> GlobalId {
    let store = TransactionLogStore::open(root, ServerId::from(server), config).unwrap();
    let id = GlobalId::new(1_000_000, 0, ServerId::from(server));
    let mut record = TransactionRecord::new(id.clone(), config.heuristic_completion_direction);
    for resource in resources {
        record
            .participants
            .push(ParticipantRef::new(*resource, resource.as_bytes().to_vec()));
    }
    record.transition(state);
    store.append(&record).unwrap();
    id
}

fn read_record(root: &Path, server: &str, config: &RecoveryConfig, id: &GlobalId) -> Option<TransactionRecord> {
    let store = TransactionLogStore::open(root, ServerId::from(server), config).unwrap();
    store.get(id).unwrap()
}

fn coordinator(
    root: &Path,
    server: &str,
    lease_store: Arc<dyn LeaseStore>,
    resolver: Arc<MapResolver>,
    config: RecoveryConfig,
) -> RecoveryCoordinator {
    let leases = Arc::new(LeaseManager::new(
        ServerId::from(server),
        lease_store,
        config.clone(),
    ));
    RecoveryCoordinator::new(leases, root.to_path_buf(), resolver, config)
}

#[tokio::test]
async fn test_committing_record_is_redriven_to_commit() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    // Crash happened after COMMITTING was durable but before any commit call
    let id = seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Committing,
        &["rm-a", "rm-b"],
    );

    let a = MockParticipant::new(Behavior::Normal);
    let b = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-a", a.clone());
    resolver.insert("rm-b", b.clone());

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        resolver,
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.unresolved, 0);

    // Both participants received commit; the record is gone
    assert_eq!(a.commits.load(Ordering::SeqCst), 1);
    assert_eq!(b.commits.load(Ordering::SeqCst), 1);
    assert!(read_record(dir.path(), "server1", &config, &id).is_none());
}

#[tokio::test]
async fn test_prepared_record_commits_never_reverts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    let id = seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Prepared,
        &["rm-a", "rm-b"],
    );

    let a = MockParticipant::new(Behavior::Normal);
    let b = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-a", a.clone());
    resolver.insert("rm-b", b.clone());

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        resolver,
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.committed, 1);
    assert!(read_record(dir.path(), "server1", &config, &id).is_none());
}

#[tokio::test]
async fn test_no_durable_decision_always_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    seed_record(dir.path(), "server1", &config, TxState::Active, &["rm-a"]);
    seed_record_at(
        dir.path(),
        "server1",
        &config,
        TxState::Preparing,
        &["rm-b"],
        2_000_000,
    );

    let a = MockParticipant::new(Behavior::Normal);
    let b = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-a", a.clone());
    resolver.insert("rm-b", b.clone());

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        resolver,
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.rolled_back, 2);
    assert_eq!(report.committed, 0);

    // Rolled back, never committed
    assert_eq!(a.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(b.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(a.commits.load(Ordering::SeqCst), 0);
    assert_eq!(b.commits.load(Ordering::SeqCst), 0);
}

/// Variant of seed_record with an explicit physical-time component so
/// several records can coexist.
fn seed_record_at(
    root: &Path,
    server: &str,
    config: &RecoveryConfig,
    state: TxState,
    resources: &[&str],
    physical: u64,
) -> GlobalId {
    let store = TransactionLogStore::open(root, ServerId::from(server), config).unwrap();
    let id = GlobalId::new(physical, 0, ServerId::from(server));
    let mut record = TransactionRecord::new(id.clone(), config.heuristic_completion_direction);
    for resource in resources {
        record
            .participants
            .push(ParticipantRef::new(*resource, resource.as_bytes().to_vec()));
    }
    record.transition(state);
    store.append(&record).unwrap();
    id
}

#[tokio::test]
async fn test_exhausted_retries_resolve_heuristically() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().with_heuristic_direction(HeuristicDirection::Rollback);

    let id = seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Committing,
        &["rm-gone"],
    );

    // Resolver knows nothing about rm-gone: permanently unreachable
    let resolver = MapResolver::new();

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        resolver,
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.heuristic, 1);

    // Direction Rollback presumes the unreachable branch rolled back
    // against the durable commit decision: a known divergence. The damaged
    // record is retained and marked, never dropped.
    let record = read_record(dir.path(), "server1", &config, &id).unwrap();
    assert_eq!(record.state, TxState::HeuristicMixed);
}

#[tokio::test]
async fn test_commit_direction_marks_unverifiable_hazard() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().with_heuristic_direction(HeuristicDirection::Commit);

    let id = seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Committing,
        &["rm-gone"],
    );

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        MapResolver::new(),
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.heuristic, 1);

    // Direction Commit presumes the branch committed, an outcome that can
    // never be verified
    let record = read_record(dir.path(), "server1", &config, &id).unwrap();
    assert_eq!(record.state, TxState::HeuristicHazard);
}

#[tokio::test]
async fn test_manual_direction_retains_record_for_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().with_heuristic_direction(HeuristicDirection::Manual);

    let id = seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Committing,
        &["rm-gone"],
    );

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        MapResolver::new(),
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.unresolved, 1);

    // Still COMMITTING; the next pass will retry
    let record = read_record(dir.path(), "server1", &config, &id).unwrap();
    assert_eq!(record.state, TxState::Committing);
}

#[tokio::test]
async fn test_recover_uses_participant_knowledge() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    seed_record(
        dir.path(),
        "server1",
        &config,
        TxState::Committing,
        &["rm-done", "rm-b"],
    );

    // rm-done already committed its branch before the crash
    let done = MockParticipant::new(Behavior::AlreadyCommitted);
    let b = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-done", done.clone());
    resolver.insert("rm-b", b.clone());

    let recovery = coordinator(
        dir.path(),
        "server1",
        Arc::new(MemoryLeaseStore::new()),
        resolver,
        config.clone(),
    );

    let report = recovery.recover_local().await.unwrap();
    assert_eq!(report.committed, 1);

    // The already-committed branch was not driven again
    assert_eq!(done.commits.load(Ordering::SeqCst), 0);
    assert_eq!(b.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_recovery_blocked_while_peer_holds_lease() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    let lease_store = Arc::new(MemoryLeaseStore::new());
    let now = lease_store.now_micros();
    // A peer is mid-recovery of our log
    lease_store
        .insert_new(StoredLease {
            server: ServerId::from("server1"),
            owner: ServerId::from("server2"),
            expiry_micros: now + 60_000_000,
            sequence: lease_store.next_sequence(),
        })
        .unwrap();

    let recovery = coordinator(
        dir.path(),
        "server1",
        lease_store,
        MapResolver::new(),
        config,
    );

    let err = recovery.recover_local().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Lease(txlog_lease::Error::LeaseHeld { .. })
    ));
}

#[tokio::test]
async fn test_peer_recovery_drains_abandoned_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    // The dead peer crashed mid-commit
    let id = seed_record(
        dir.path(),
        "server2",
        &config,
        TxState::Committing,
        &["rm-a"],
    );

    let lease_store = Arc::new(MemoryLeaseStore::new());
    lease_store
        .insert_new(StoredLease {
            server: ServerId::from("server2"),
            owner: ServerId::from("server2"),
            expiry_micros: 1, // long expired
            sequence: lease_store.next_sequence(),
        })
        .unwrap();

    let a = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-a", a.clone());

    let recovery = coordinator(dir.path(), "server1", lease_store.clone(), resolver, config.clone());

    let report = recovery
        .recover_peer(&ServerId::from("server2"))
        .await
        .unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(a.commits.load(Ordering::SeqCst), 1);
    assert!(read_record(dir.path(), "server2", &config, &id).is_none());

    // The stolen lease was released so the peer can reclaim its log
    assert!(lease_store.get(&ServerId::from("server2")).unwrap().is_none());
}

#[tokio::test]
async fn test_unresolved_peer_pass_keeps_lease_until_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config()
        .with_heuristic_direction(HeuristicDirection::Manual)
        .with_lease_timing(Duration::from_millis(40), Duration::from_millis(10));

    // Dead peer crashed mid-commit; its resource manager is unreachable
    let id = seed_record(
        dir.path(),
        "server2",
        &config,
        TxState::Committing,
        &["rm-gone"],
    );

    let lease_store = Arc::new(MemoryLeaseStore::new());
    lease_store
        .insert_new(StoredLease {
            server: ServerId::from("server2"),
            owner: ServerId::from("server2"),
            expiry_micros: 1,
            sequence: lease_store.next_sequence(),
        })
        .unwrap();

    let resolver = MapResolver::new();
    let recovery = coordinator(
        dir.path(),
        "server1",
        lease_store.clone(),
        resolver.clone(),
        config.clone(),
    );

    let report = recovery
        .recover_peer(&ServerId::from("server2"))
        .await
        .unwrap();
    assert_eq!(report.unresolved, 1);

    // The record survived and the stolen lease was NOT released, so the
    // server stays visible to future staleness scans
    assert!(read_record(dir.path(), "server2", &config, &id).is_some());
    let lease = lease_store.get(&ServerId::from("server2")).unwrap().unwrap();
    assert_eq!(lease.owner, ServerId::from("server1"));

    // Once the stolen lease lapses the scan picks the server up again; the
    // resource manager has come back, so this pass completes the commit
    let a = MockParticipant::new(Behavior::Normal);
    resolver.insert("rm-gone", a.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;

    let report = recovery.scan_and_recover_peers().await.unwrap();
    assert_eq!(report.committed, 1);
    assert!(read_record(dir.path(), "server2", &config, &id).is_none());
    assert!(lease_store.get(&ServerId::from("server2")).unwrap().is_none());
}

#[tokio::test]
async fn test_scan_finds_and_recovers_stale_peer() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    seed_record(
        dir.path(),
        "server2",
        &config,
        TxState::RollingBack,
        &["rm-a"],
    );

    let lease_store = Arc::new(MemoryLeaseStore::new());
    lease_store
        .insert_new(StoredLease {
            server: ServerId::from("server2"),
            owner: ServerId::from("server2"),
            expiry_micros: 1,
            sequence: lease_store.next_sequence(),
        })
        .unwrap();

    let a = MockParticipant::new(Behavior::Normal);
    let resolver = MapResolver::new();
    resolver.insert("rm-a", a.clone());

    let recovery = coordinator(dir.path(), "server1", lease_store, resolver, config);

    let report = recovery.scan_and_recover_peers().await.unwrap();
    assert_eq!(report.rolled_back, 1);
    assert_eq!(a.rollbacks.load(Ordering::SeqCst), 1);
}
