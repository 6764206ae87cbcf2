//! Retry policy and backoff calculation.
//!
//! Provides the portable building blocks of the retry loop. The async
//! execution itself lives in `archon-http`:
//!
//! - [`RetryPolicy`]: immutable per-call parameters (retries, base delay, attempt deadline)
//! - [`backoff_delay`]: `base * 2^attempt + U[0, base)` with real randomness
//! - [`backoff_delay_with_jitter`]: the same formula with caller-supplied jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
/// Default per-attempt deadline in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5000;

/// Retry parameters for one logical call.
///
/// `max_retries` counts retries, not attempts: a policy with
/// `max_retries = 2` makes at most three attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms (default: 100).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Deadline for each individual attempt in ms (default: 5000).
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_attempt_timeout_ms() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry count and attempt deadline, default base delay.
    #[must_use]
    pub fn new(max_retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            attempt_timeout_ms: u64::try_from(attempt_timeout.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Replace the base backoff delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Total attempts this policy allows (`max_retries + 1`).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Per-attempt deadline.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Base backoff delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Randomized wait before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay(attempt, self.base_delay_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential part of the schedule: `base * 2^attempt`, saturating.
#[must_use]
pub fn exponential_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    base_delay_ms.saturating_mul(2u64.saturating_pow(attempt))
}

/// Backoff delay with caller-supplied jitter.
///
/// Formula: `base * 2^attempt + jitter`, where `jitter` is clamped into
/// `[0, base)`. With `base = 0` there is no jitter and no delay.
///
/// # Arguments
///
/// * `attempt`: zero-based index of the attempt that just failed
/// * `base_delay_ms`: base delay in milliseconds
/// * `jitter_ms`: random perturbation, clamped below `base_delay_ms`
#[must_use]
pub fn backoff_delay_with_jitter(attempt: u32, base_delay_ms: u64, jitter_ms: u64) -> u64 {
    let jitter = if base_delay_ms == 0 {
        0
    } else {
        jitter_ms.min(base_delay_ms - 1)
    };
    exponential_delay(attempt, base_delay_ms).saturating_add(jitter)
}

/// Backoff delay with jitter drawn uniformly from `[0, base)`.
#[must_use]
pub fn backoff_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    let jitter = if base_delay_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..base_delay_ms)
    };
    backoff_delay_with_jitter(attempt, base_delay_ms, jitter)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
