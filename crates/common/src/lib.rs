//! Shared types for the transaction log workspace
//!
//! This crate holds everything the log store, lease manager, commit engine
//! and recovery coordinator agree on: transaction identifiers, the durable
//! record model, the participant contract, and the recovery configuration.

pub mod config;
pub mod global_id;
pub mod participant;
pub mod record;
pub mod state;

// Re-export main types
pub use config::RecoveryConfig;
pub use global_id::{GlobalId, GlobalIdGenerator, ServerId};
pub use participant::{
    Participant, ParticipantError, ParticipantOutcome, ParticipantResolver, Vote,
};
pub use record::{ParticipantRef, TransactionRecord};
pub use state::{HeuristicDirection, TxState};
