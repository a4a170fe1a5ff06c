//! Two-phase-commit engine
//!
//! Drives prepare/commit/rollback for a single global transaction across its
//! registered participants. Every state transition that must survive a crash
//! is written to the transaction log before the external calls it authorizes
//! (write-ahead), so a process killed at any point leaves a record the
//! recovery coordinator can re-drive.

pub mod engine;
pub mod error;
pub mod retry;

pub use engine::{Outcome, TwoPhaseCommitEngine};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
