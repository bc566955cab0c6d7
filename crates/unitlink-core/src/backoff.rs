//! # Retry Backoff
//!
//! Pure retry delay schedule. The live caller feeds `base` and `ceiling`
//! into a randomized exponential backoff; `delay()` is the nominal value
//! each randomized delay is spread around.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BACKOFF STRATEGY (Exponential, randomized ±50% by the caller)          │
//! │  ───────────────────────────────────────────────                        │
//! │  delay(attempt) = min(base * 2^attempt, ceiling)                        │
//! │                                                                         │
//! │  base = 500ms, ceiling = 10s                                            │
//! │  Attempt 0: 500ms      Attempt 3: 4s                                    │
//! │  Attempt 1: 1s         Attempt 4: 8s                                    │
//! │  Attempt 2: 2s         Attempt 5+: 10s                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Duration,
}

impl BackoffPolicy {
    /// Creates a backoff schedule.
    pub const fn new(base: Duration, ceiling: Duration) -> Self {
        BackoffPolicy { base, ceiling }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Nominal delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.ceiling)
    }
}
