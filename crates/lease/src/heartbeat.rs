//! Lease renewal heartbeat

use crate::manager::LeaseManager;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Start the lease renewal task.
///
/// Renews this server's lease every `lease_check_interval`, independent of
/// any in-flight transaction work. A failed renewal is a liveness signal:
/// the task attempts to re-acquire, and logs loudly if the lease is gone for
/// good. The caller aborts the handle at shutdown.
pub fn start(manager: Arc<LeaseManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(manager.config().lease_check_interval);

        loop {
            ticker.tick().await;

            match manager.renew().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        server = %manager.server(),
                        "lease renewal lost, attempting reacquire"
                    );
                    if let Err(e) = manager.acquire_own().await {
                        tracing::warn!(
                            server = %manager.server(),
                            "could not reacquire own lease: {}",
                            e
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %manager.server(), "lease renewal failed: {}", e);
                }
            }
        }
    })
}
