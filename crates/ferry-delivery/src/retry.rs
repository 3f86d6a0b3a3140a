//! Exponential backoff for queued deliveries.
//!
//! Pure and deterministic: the same attempt count and failure time always
//! produce the same schedule. With the defaults a failing entry is retried
//! after 15, 30, 60, 120, 240, 480 and then 960 minutes until ten attempts
//! have been taken, at which point it is given up on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backoff configuration for queued deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure, and after the failed immediate attempt.
    pub base_delay: Duration,

    /// Largest exponent applied to `base_delay`; delays saturate at
    /// `base_delay * 2^cap_exponent`.
    pub cap_exponent: u32,

    /// Attempts taken from the queue before the entry is marked failed.
    pub max_attempts: i32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(crate::DEFAULT_BASE_DELAY_SECONDS),
            cap_exponent: crate::DEFAULT_CAP_EXPONENT,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Next state of an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stay pending until `next_retry_at`.
    Retry {
        /// Attempts taken, including the one that just failed
        attempts: i32,
        /// When the entry becomes eligible again
        next_retry_at: DateTime<Utc>,
    },
    /// Mark the entry failed.
    GiveUp {
        /// Attempts taken, including the one that just failed
        attempts: i32,
    },
}

impl RetryDecision {
    /// Attempt count to persist.
    pub const fn attempts(&self) -> i32 {
        match self {
            Self::Retry { attempts, .. } | Self::GiveUp { attempts } => *attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay scheduled after the `attempts_after`-th failed attempt.
    ///
    /// `attempts_after` is 1-based; zero is treated as one.
    pub fn delay_for(&self, attempts_after: i32) -> Duration {
        let exponent = u32::try_from(attempts_after.saturating_sub(1)).unwrap_or(0);
        let multiplier = 2_u32.saturating_pow(exponent.min(self.cap_exponent));
        self.base_delay.saturating_mul(multiplier)
    }

    /// First eligible retry time for an entry created at `now`.
    pub fn first_retry_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + to_chrono(self.base_delay)
    }

    /// Computes the state after a failed attempt at `now`.
    pub fn next_state(&self, attempts_before: i32, now: DateTime<Utc>) -> RetryDecision {
        let attempts = attempts_before.saturating_add(1);

        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp { attempts };
        }

        RetryDecision::Retry { attempts, next_retry_at: now + to_chrono(self.delay_for(attempts)) }
    }

    /// Whether a delivery was attempted for every allowed attempt.
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
