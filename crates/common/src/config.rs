//! Recovery service configuration
//!
//! An explicit immutable configuration struct passed into each component at
//! construction. Replaces the process-wide configuration-provider singletons
//! of older transaction managers.

use crate::state::HeuristicDirection;
use std::time::Duration;

/// Tuning knobs for the log store, lease manager, commit engine and
/// recovery coordinator.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of records held in one server's transaction log
    pub transaction_log_size: u64,

    /// Default outcome when a participant fails ambiguously during recovery
    pub heuristic_completion_direction: HeuristicDirection,

    /// Skip the prepare phase when exactly one participant is enlisted
    pub one_pc_optimization: bool,

    /// How long a lease grant lasts before it may be stolen
    pub lease_length: Duration,

    /// How often the owning server renews its own lease
    pub lease_check_interval: Duration,

    /// How far past expiry a peer lease must be before it is considered stale
    pub peer_time_before_stale: Duration,

    /// Interval of the background peer-recovery scan
    pub time_between_heartbeats: Duration,

    /// Treat total log-store failure as process-fatal
    pub shutdown_on_log_failure: bool,

    /// Spacing of retries for participant commit/rollback and store access
    pub standard_retry_time: Duration,
    /// Retry count for participant commit/rollback and store access
    pub standard_retry_attempts: u32,

    /// Spacing of retries for prepare-phase participant calls
    pub lightweight_retry_time: Duration,
    /// Retry count for prepare-phase participant calls
    pub lightweight_retry_attempts: u32,

    /// Continue operating after a heuristic hazard instead of halting
    pub accept_heuristic_hazard: bool,

    /// Emit operational log messages for every heuristic outcome
    pub log_heuristics: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            transaction_log_size: 1024,
            heuristic_completion_direction: HeuristicDirection::Rollback,
            one_pc_optimization: true,
            lease_length: Duration::from_secs(20),
            lease_check_interval: Duration::from_secs(5),
            peer_time_before_stale: Duration::from_secs(10),
            time_between_heartbeats: Duration::from_secs(5),
            shutdown_on_log_failure: false,
            standard_retry_time: Duration::from_secs(10),
            standard_retry_attempts: 180,
            lightweight_retry_time: Duration::from_secs(1),
            lightweight_retry_attempts: 2,
            accept_heuristic_hazard: true,
            log_heuristics: true,
        }
    }
}

impl RecoveryConfig {
    /// Set the transaction log size bound
    pub fn with_transaction_log_size(mut self, size: u64) -> Self {
        self.transaction_log_size = size;
        self
    }

    /// Set the heuristic completion direction
    pub fn with_heuristic_direction(mut self, direction: HeuristicDirection) -> Self {
        self.heuristic_completion_direction = direction;
        self
    }

    /// Enable or disable the one-phase-commit optimization
    pub fn with_one_pc_optimization(mut self, enabled: bool) -> Self {
        self.one_pc_optimization = enabled;
        self
    }

    /// Set lease length and renewal interval together
    pub fn with_lease_timing(mut self, length: Duration, check_interval: Duration) -> Self {
        self.lease_length = length;
        self.lease_check_interval = check_interval;
        self
    }

    /// Set the peer staleness margin
    pub fn with_peer_time_before_stale(mut self, margin: Duration) -> Self {
        self.peer_time_before_stale = margin;
        self
    }

    /// Set the peer-scan interval
    pub fn with_time_between_heartbeats(mut self, interval: Duration) -> Self {
        self.time_between_heartbeats = interval;
        self
    }

    /// Set the standard transient-error retry policy
    pub fn with_standard_retry(mut self, time: Duration, attempts: u32) -> Self {
        self.standard_retry_time = time;
        self.standard_retry_attempts = attempts;
        self
    }

    /// Set the lightweight transient-error retry policy
    pub fn with_lightweight_retry(mut self, time: Duration, attempts: u32) -> Self {
        self.lightweight_retry_time = time;
        self.lightweight_retry_attempts = attempts;
        self
    }

    /// Set whether log-store failure halts the process
    pub fn with_shutdown_on_log_failure(mut self, enabled: bool) -> Self {
        self.shutdown_on_log_failure = enabled;
        self
    }

    /// Set whether heuristic hazards are tolerated
    pub fn with_accept_heuristic_hazard(mut self, enabled: bool) -> Self {
        self.accept_heuristic_hazard = enabled;
        self
    }
}
