//! Transaction recovery coordinator
//!
//! On startup, claims this server's lease and drives every incomplete
//! transaction in the local log to resolution. In the background, scans for
//! peers whose lease has gone stale, steals the expired lease, and recovers
//! the abandoned log the same way. A log is never touched without holding
//! its lease, which is what keeps two processes from resolving the same
//! transaction twice.

pub mod coordinator;
pub mod error;
pub mod peer_scan;

pub use coordinator::{RecoveryCoordinator, RecoveryReport};
pub use error::{Error, Result};
