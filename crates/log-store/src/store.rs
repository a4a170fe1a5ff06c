//! Fjall-backed transaction log store

use crate::error::{Error, Result};
use fjall::{Keyspace, Partition, PartitionCreateOptions, PersistMode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use txlog_common::{GlobalId, RecoveryConfig, ServerId, TransactionRecord};

const LAST_POSITION_KEY: &[u8] = b"last_position";

/// Monotonic append sequence within one server's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition(pub u64);

/// Durable per-server log of in-flight transactions.
///
/// Records are keyed by global id; appending an id that already exists
/// overwrites the record (state transitions are rewrites of the same key).
/// Every mutation is persisted with `PersistMode::SyncAll` before returning,
/// which is what makes the write-ahead discipline of the commit engine hold
/// across a crash.
pub struct TransactionLogStore {
    server: ServerId,
    keyspace: Keyspace,
    records: Partition,
    metadata: Partition,
    record_count: AtomicU64,
    last_position: AtomicU64,
    log_size: u64,
}

impl TransactionLogStore {
    /// Open (or create) the log for `server` under `root`.
    pub fn open(root: &Path, server: ServerId, config: &RecoveryConfig) -> Result<Self> {
        let path = root.join(server.as_str());
        std::fs::create_dir_all(&path)?;

        let keyspace = fjall::Config::new(&path).open()?;

        let records = keyspace.open_partition(
            "records",
            PartitionCreateOptions::default().compression(fjall::CompressionType::None),
        )?;
        let metadata = keyspace.open_partition(
            "_metadata",
            PartitionCreateOptions::default().compression(fjall::CompressionType::None),
        )?;

        let mut count = 0u64;
        for item in records.iter() {
            item?;
            count += 1;
        }

        let last_position = match metadata.get(LAST_POSITION_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..]
                    .try_into()
                    .map_err(|_| Error::Other("corrupt log position metadata".to_string()))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };

        Ok(Self {
            server,
            keyspace,
            records,
            metadata,
            record_count: AtomicU64::new(count),
            last_position: AtomicU64::new(last_position),
            log_size: config.transaction_log_size,
        })
    }

    /// The server whose log this is.
    pub fn server(&self) -> &ServerId {
        &self.server
    }

    /// Durably persist a new or updated record.
    ///
    /// Returns only after the write has been synced; callers must not perform
    /// the external action gated by this transition unless `append` returned
    /// `Ok`.
    pub fn append(&self, record: &TransactionRecord) -> Result<LogPosition> {
        let key = record.global_id.key_bytes();
        let is_new = self.records.get(&key)?.is_none();

        if is_new && self.record_count.load(Ordering::SeqCst) >= self.log_size {
            self.rotate_terminal()?;
            if self.record_count.load(Ordering::SeqCst) >= self.log_size {
                return Err(Error::LogFull {
                    size: self.log_size,
                });
            }
        }

        let value = serde_json::to_vec(record)?;
        let position = self.last_position.fetch_add(1, Ordering::SeqCst) + 1;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.records, key, value);
        batch.insert(&self.metadata, LAST_POSITION_KEY, position.to_be_bytes());
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        if is_new {
            self.record_count.fetch_add(1, Ordering::SeqCst);
        }

        Ok(LogPosition(position))
    }

    /// Read every record in the log.
    ///
    /// Recovery-time snapshot read; the result is re-iterable since it comes
    /// from durable storage. An undecodable record is an error, never
    /// silently skipped.
    pub fn read_all(&self) -> Result<Vec<TransactionRecord>> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Fetch a single record.
    pub fn get(&self, global_id: &GlobalId) -> Result<Option<TransactionRecord>> {
        match self.records.get(global_id.key_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete a terminal record. Idempotent: removing an absent id is not an
    /// error.
    pub fn remove(&self, global_id: &GlobalId) -> Result<()> {
        let key = global_id.key_bytes();
        if self.records.get(&key)?.is_some() {
            self.records.remove(key)?;
            self.keyspace.persist(PersistMode::SyncAll)?;
            self.record_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Number of records currently in the log.
    pub fn len(&self) -> u64 {
        self.record_count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal-state records to make room near the size bound.
    fn rotate_terminal(&self) -> Result<()> {
        let mut stale = Vec::new();
        for item in self.records.iter() {
            let (key, value) = item?;
            let record: TransactionRecord = serde_json::from_slice(&value)?;
            if record.state.is_terminal() {
                stale.push(key);
            }
        }

        if stale.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            server = %self.server,
            removed = stale.len(),
            "rotating terminal records out of full transaction log"
        );

        let removed = stale.len() as u64;
        for key in stale {
            self.records.remove(key)?;
        }
        self.keyspace.persist(PersistMode::SyncAll)?;
        self.record_count.fetch_sub(removed, Ordering::SeqCst);
        Ok(())
    }
}
