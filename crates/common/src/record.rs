//! Durable transaction record model

use crate::global_id::{now_micros, GlobalId};
use crate::state::{HeuristicDirection, TxState};
use serde::{Deserialize, Serialize};

/// Durable identity of an enlisted participant.
///
/// Holds enough to re-derive a live participant handle during recovery
/// without a live connection: the resource manager's identity plus an opaque
/// recovery token the resource manager issued at enlist time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Resource manager identity
    pub resource_id: String,
    /// Opaque recovery token
    pub recovery_token: Vec<u8>,
}

impl ParticipantRef {
    pub fn new(resource_id: impl Into<String>, recovery_token: Vec<u8>) -> Self {
        Self {
            resource_id: resource_id.into(),
            recovery_token,
        }
    }
}

/// One global transaction as persisted in the log.
///
/// Participant order is insertion order and is significant: prepare and
/// commit walk participants in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub global_id: GlobalId,
    pub state: TxState,
    pub participants: Vec<ParticipantRef>,
    pub heuristic_direction: HeuristicDirection,
    /// Microseconds since epoch of the last state transition
    pub last_modified_micros: u64,
}

impl TransactionRecord {
    pub fn new(global_id: GlobalId, heuristic_direction: HeuristicDirection) -> Self {
        Self {
            global_id,
            state: TxState::Active,
            participants: Vec::new(),
            heuristic_direction,
            last_modified_micros: now_micros(),
        }
    }

    /// Move to a new state, touching the modification time.
    pub fn transition(&mut self, state: TxState) {
        self.state = state;
        self.last_modified_micros = now_micros();
    }
}
