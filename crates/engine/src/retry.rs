//! Bounded retry of participant calls

use std::time::Duration;
use txlog_common::ParticipantError;

/// A bounded retry policy: one initial try plus `attempts` retries spaced
/// `interval` apart.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Run `op` until it returns something other than
    /// `ParticipantError::Unavailable` or the attempts are exhausted.
    /// Heuristic reports and successes pass through immediately.
    pub async fn run<T>(
        &self,
        mut op: impl FnMut() -> std::result::Result<T, ParticipantError>,
    ) -> std::result::Result<T, ParticipantError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(ParticipantError::Unavailable(reason)) => {
                    if attempt >= self.attempts {
                        return Err(ParticipantError::Unavailable(reason));
                    }
                    attempt += 1;
                    tracing::debug!(attempt, reason = %reason, "participant call retrying");
                    tokio::time::sleep(self.interval).await;
                }
                other => return other,
            }
        }
    }
}
