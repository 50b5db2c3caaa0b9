//! Retry budget and backoff between refresh attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RefreshPolicy;

/// Base delay for all retry schedules. Not user-configurable so that the
/// worst-case wait of a refresh stays bounded.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Growth of the delay between consecutive retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * n` for retry `n`.
    Linear,
    /// `base * 2^(n-1)` for retry `n`.
    #[default]
    Exponential,
}

impl Backoff {
    /// Delay before retry `attempt` (1-based), capped at `max`.
    ///
    /// `attempt = 0` means the initial try and has no delay.
    pub fn delay(self, base: Duration, max: Duration, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let scale = match self {
            Self::Linear => f64::from(attempt),
            Self::Exponential => 2_f64.powi(attempt.saturating_sub(1).min(62) as i32),
        };
        let seconds = base.as_secs_f64() * scale;
        Duration::from_secs_f64(seconds.min(max.as_secs_f64()))
    }
}

/// Retry plan for one source of one refresh operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Retries after the initial attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPlan {
    pub fn from_policy(policy: &RefreshPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            backoff: policy.retry_backoff,
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::default(),
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow `attempts_made` failed attempts.
    pub const fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.total_attempts()
    }

    /// Delay before retry `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay(self.base_delay, self.max_delay, retry)
    }
}
