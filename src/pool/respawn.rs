//! Respawn budget for crashing workers and retry budget for their jobs.

use std::time::Duration;

/// Consecutive failures a slot may accumulate before it is retired.
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Backoff before the first respawn (in milliseconds).
const BASE_DELAY_MS: u64 = 100;

/// Upper bound for the backoff (in milliseconds).
const MAX_DELAY_MS: u64 = 5_000;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1_000;
const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// `base * 2^(n - 1)`, capped at `max`.
fn backoff(base: Duration, max: Duration, n: u32) -> Duration {
    let exponent = n.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |d| d.min(max))
}

/// When and how often a dead worker is respawned.
///
/// A failure is any exit the pool did not ask for, or a failed spawn. The
/// counter resets whenever the worker finishes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnPolicy {
    pub max_consecutive_failures: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// What to do with a slot after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnDecision {
    /// Sleep, then spawn again.
    Retry(Duration),
    /// Give up on this slot.
    Retire,
}

impl Default for RespawnPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RespawnPolicy {
    /// Decide after the `failures`-th consecutive failure (1-based).
    pub fn decide(&self, failures: u32) -> RespawnDecision {
        if failures > self.max_consecutive_failures {
            RespawnDecision::Retire
        } else {
            RespawnDecision::Retry(self.delay(failures))
        }
    }

    /// `base * 2^(failures - 1)`, capped at `max_delay`.
    pub fn delay(&self, failures: u32) -> Duration {
        backoff(self.base_delay, self.max_delay, failures)
    }
}

/// How often a job is re-run after its worker crashed or timed out.
///
/// Codec errors are final; only the process dying under a job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first run included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` once `attempts` used the budget.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        (attempts < self.max_attempts).then(|| backoff(self.base_delay, self.max_delay, attempts))
    }
}
