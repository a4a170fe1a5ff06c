//! Recovery-log ownership leases
//!
//! Each server's recovery log is guarded by a lease record in a shared
//! store. The owning server renews its lease on a heartbeat; a peer may
//! steal the lease, and with it the right to recover the log, only once the
//! lease has expired, and only via an atomic conditional update so that two
//! racing peers can never both win.

pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod store;

pub use error::{Error, Result};
pub use manager::LeaseManager;
pub use store::{FjallLeaseStore, LeaseStore, MemoryLeaseStore, StoredLease};
