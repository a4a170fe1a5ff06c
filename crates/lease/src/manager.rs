//! Lease manager
//!
//! Per-process view over the shared lease store. Owns the acquire / renew /
//! steal / release state machine for this server and the staleness scan over
//! peers. All decisions predicate on the store's clock and sequence, so the
//! atomicity lives in the store, never in a local lock.

use crate::error::{Error, Result};
use crate::store::{LeaseStore, StoredLease};
use std::sync::Arc;
use txlog_common::{RecoveryConfig, ServerId};

/// Manages this server's lease and staleness checks against peers.
pub struct LeaseManager {
    server: ServerId,
    store: Arc<dyn LeaseStore>,
    config: RecoveryConfig,
}

impl LeaseManager {
    pub fn new(server: ServerId, store: Arc<dyn LeaseStore>, config: RecoveryConfig) -> Self {
        Self {
            server,
            store,
            config,
        }
    }

    /// This server's identity.
    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Claim this server's own lease at startup.
    ///
    /// Succeeds when no record exists, when a previous incarnation of this
    /// server still holds the record, or when the record has expired.
    /// Otherwise another process holds a live lease and the caller must back
    /// off or recover elsewhere.
    pub async fn acquire_own(&self) -> Result<StoredLease> {
        self.with_store_retry(|| {
            let now = self.store.now_micros();
            let fresh = self.fresh_lease(self.server.clone(), now);

            match self.store.get(&self.server)? {
                None => {
                    if self.store.insert_new(fresh.clone())? {
                        return Ok(fresh);
                    }
                }
                Some(current) => {
                    let reclaimable =
                        current.owner == self.server || current.expiry_micros < now;
                    if !reclaimable {
                        return Err(Error::LeaseHeld {
                            server: self.server.clone(),
                            holder: current.owner,
                        });
                    }
                    if self
                        .store
                        .compare_and_swap(&self.server, current.sequence, fresh.clone())?
                    {
                        return Ok(fresh);
                    }
                }
            }

            // Lost a race; report whoever won as the holder
            let holder = self
                .store
                .get(&self.server)?
                .map(|l| l.owner)
                .unwrap_or_else(|| self.server.clone());
            Err(Error::LeaseHeld {
                server: self.server.clone(),
                holder,
            })
        })
        .await
    }

    /// Extend this server's lease by the configured lease length.
    ///
    /// `Ok(false)` means the lease was lost (overwritten or deleted by
    /// another claimant). That is the primary liveness signal; it is not
    /// fatal by itself but the caller must reconcile before trusting the log.
    pub async fn renew(&self) -> Result<bool> {
        self.with_store_retry(|| {
            let current = match self.store.get(&self.server)? {
                Some(lease) if lease.owner == self.server => lease,
                _ => return Ok(false),
            };

            let now = self.store.now_micros();
            let renewed = self.fresh_lease(self.server.clone(), now);
            self.store
                .compare_and_swap(&self.server, current.sequence, renewed)
        })
        .await
    }

    /// Attempt to steal an expired peer lease.
    ///
    /// Succeeds only if the stored expiry is in the past at the moment of an
    /// atomic compare-and-set on the observed record version; of any number
    /// of racing claimants, exactly one wins and the rest see `LeaseHeld`.
    pub async fn try_steal_peer_lease(&self, target: &ServerId) -> Result<StoredLease> {
        self.with_store_retry(|| {
            let current = self
                .store
                .get(target)?
                .ok_or_else(|| Error::NotFound(target.clone()))?;

            let now = self.store.now_micros();
            if current.expiry_micros >= now {
                return Err(Error::LeaseHeld {
                    server: target.clone(),
                    holder: current.owner,
                });
            }

            let stolen = StoredLease {
                server: target.clone(),
                owner: self.server.clone(),
                expiry_micros: now + self.config.lease_length.as_micros() as u64,
                sequence: self.store.next_sequence(),
            };

            if self
                .store
                .compare_and_swap(target, current.sequence, stolen.clone())?
            {
                tracing::info!(target = %target, claimant = %self.server, "stole expired peer lease");
                Ok(stolen)
            } else {
                // Someone else's CAS landed first
                let holder = self
                    .store
                    .get(target)?
                    .map(|l| l.owner)
                    .unwrap_or_else(|| target.clone());
                Err(Error::LeaseHeld {
                    server: target.clone(),
                    holder,
                })
            }
        })
        .await
    }

    /// Release a lease this server holds (own lease at clean shutdown, or a
    /// stolen peer lease once its recovery completed).
    pub async fn release(&self, server: &ServerId) -> Result<bool> {
        self.with_store_retry(|| self.store.remove_if_owner(server, &self.server))
            .await
    }

    /// Peers whose lease expired more than `peer_time_before_stale` ago.
    ///
    /// The generous margin beyond plain expiry keeps a briefly-late renewal
    /// from triggering a peer recovery attempt.
    pub async fn stale_peers(&self) -> Result<Vec<ServerId>> {
        self.with_store_retry(|| {
            let now = self.store.now_micros();
            let margin = self.config.peer_time_before_stale.as_micros() as u64;

            Ok(self
                .store
                .list()?
                .into_iter()
                .filter(|lease| {
                    lease.server != self.server
                        && lease.expiry_micros.saturating_add(margin) < now
                })
                .map(|lease| lease.server)
                .collect())
        })
        .await
    }

    fn fresh_lease(&self, owner: ServerId, now: u64) -> StoredLease {
        StoredLease {
            server: self.server.clone(),
            owner,
            expiry_micros: now + self.config.lease_length.as_micros() as u64,
            sequence: self.store.next_sequence(),
        }
    }

    /// Run a store operation under the standard transient-error retry
    /// policy. Only I/O failures are retried; contention outcomes pass
    /// straight through.
    async fn with_store_retry<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(Error::Io(reason)) if attempt < self.config.standard_retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        reason = %reason,
                        "lease store unavailable, retrying"
                    );
                    tokio::time::sleep(self.config.standard_retry_time).await;
                }
                other => return other,
            }
        }
    }
}
