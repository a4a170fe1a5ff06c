//! Lease store: the shared atomic conditional-update primitive
//!
//! The lease store is the only thing peers in separate processes agree
//! through, so every mutation must be atomic at the record level. The trait
//! models a single-record compare-and-swap keyed on a store-issued sequence
//! number; expiry comparison uses the store's clock, never a peer's local
//! wall time, so clock skew cannot produce double ownership.

use crate::error::{Error, Result};
use fjall::{Keyspace, Partition, PartitionCreateOptions, PersistMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use txlog_common::{global_id::now_micros, ServerId};

const SEQUENCE_KEY: &[u8] = b"sequence";

/// A lease record as held in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLease {
    /// Server whose recovery log this lease guards
    pub server: ServerId,
    /// Current holder (differs from `server` during peer recovery)
    pub owner: ServerId,
    /// Store-clock time after which the lease may be stolen
    pub expiry_micros: u64,
    /// Store-issued sequence of the write that produced this version
    pub sequence: u64,
}

/// Shared lease store contract.
///
/// Implementations must make `insert_new` and `compare_and_swap` atomic with
/// respect to each other: of any number of concurrent writers predicating on
/// the same observed sequence, at most one may succeed.
pub trait LeaseStore: Send + Sync {
    /// Read the lease record for a server, if any.
    fn get(&self, server: &ServerId) -> Result<Option<StoredLease>>;

    /// Insert a lease only if no record exists. Returns false when a record
    /// is already present.
    fn insert_new(&self, lease: StoredLease) -> Result<bool>;

    /// Replace the lease only if the stored sequence still matches
    /// `expected_sequence`. Returns false when the record changed or is gone.
    fn compare_and_swap(
        &self,
        server: &ServerId,
        expected_sequence: u64,
        new: StoredLease,
    ) -> Result<bool>;

    /// Delete the lease only if `owner` still holds it.
    fn remove_if_owner(&self, server: &ServerId, owner: &ServerId) -> Result<bool>;

    /// All lease records, for the peer scan.
    fn list(&self) -> Result<Vec<StoredLease>>;

    /// Issue the next write sequence.
    fn next_sequence(&self) -> u64;

    /// The store's clock, microseconds since epoch.
    fn now_micros(&self) -> u64 {
        now_micros()
    }
}

/// In-process lease store.
///
/// Stand-in for a shared database in tests and single-process deployments;
/// the mutex gives the same single-record atomicity a conditional UPDATE
/// would.
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<ServerId, StoredLease>>,
    sequence: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn get(&self, server: &ServerId) -> Result<Option<StoredLease>> {
        Ok(self.leases.lock().get(server).cloned())
    }

    fn insert_new(&self, lease: StoredLease) -> Result<bool> {
        let mut leases = self.leases.lock();
        if leases.contains_key(&lease.server) {
            return Ok(false);
        }
        leases.insert(lease.server.clone(), lease);
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        server: &ServerId,
        expected_sequence: u64,
        new: StoredLease,
    ) -> Result<bool> {
        let mut leases = self.leases.lock();
        match leases.get(server) {
            Some(current) if current.sequence == expected_sequence => {
                leases.insert(server.clone(), new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_if_owner(&self, server: &ServerId, owner: &ServerId) -> Result<bool> {
        let mut leases = self.leases.lock();
        match leases.get(server) {
            Some(current) if &current.owner == owner => {
                leases.remove(server);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<StoredLease>> {
        Ok(self.leases.lock().values().cloned().collect())
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Fjall-backed lease store.
///
/// Durable across restarts of one process. The read-modify-write of each
/// conditional update runs under a mutex; a multi-process deployment swaps
/// in a store backed by a database with row-level conditional updates behind
/// the same trait.
pub struct FjallLeaseStore {
    keyspace: Keyspace,
    leases: Partition,
    metadata: Partition,
    sequence: AtomicU64,
    write_lock: Mutex<()>,
}

impl FjallLeaseStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let keyspace = fjall::Config::new(path).open()?;

        let leases = keyspace.open_partition(
            "leases",
            PartitionCreateOptions::default().compression(fjall::CompressionType::None),
        )?;
        let metadata = keyspace.open_partition(
            "_metadata",
            PartitionCreateOptions::default().compression(fjall::CompressionType::None),
        )?;

        let sequence = match metadata.get(SEQUENCE_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..]
                    .try_into()
                    .map_err(|_| Error::Io("corrupt lease sequence metadata".to_string()))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };

        Ok(Self {
            keyspace,
            leases,
            metadata,
            sequence: AtomicU64::new(sequence),
            write_lock: Mutex::new(()),
        })
    }

    fn read(&self, server: &ServerId) -> Result<Option<StoredLease>> {
        match self.leases.get(server.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, lease: &StoredLease) -> Result<()> {
        let value = serde_json::to_vec(lease)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.leases, lease.server.as_str().as_bytes(), value);
        batch.insert(
            &self.metadata,
            SEQUENCE_KEY,
            self.sequence.load(Ordering::SeqCst).to_be_bytes(),
        );
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

impl LeaseStore for FjallLeaseStore {
    fn get(&self, server: &ServerId) -> Result<Option<StoredLease>> {
        self.read(server)
    }

    fn insert_new(&self, lease: StoredLease) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.read(&lease.server)?.is_some() {
            return Ok(false);
        }
        self.write(&lease)?;
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        server: &ServerId,
        expected_sequence: u64,
        new: StoredLease,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock();
        match self.read(server)? {
            Some(current) if current.sequence == expected_sequence => {
                self.write(&new)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_if_owner(&self, server: &ServerId, owner: &ServerId) -> Result<bool> {
        let _guard = self.write_lock.lock();
        match self.read(server)? {
            Some(current) if &current.owner == owner => {
                self.leases.remove(server.as_str().as_bytes())?;
                self.keyspace.persist(PersistMode::SyncAll)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<StoredLease>> {
        let mut out = Vec::new();
        for item in self.leases.iter() {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}
