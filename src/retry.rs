//! Exponential backoff for external capability calls.

use crate::error::CapabilityError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt budget with a doubling delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy with no waiting, for tests and local backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On exhaustion the last
    /// transient error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CapabilityError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err @ CapabilityError::Fatal(_)) => return Err(err),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    let backoff = self.delay_for(attempt);
                    warn!(
                        target_label = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Capability call failed, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
