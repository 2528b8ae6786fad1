// Exponential backoff shared by stream reconnects and webhook retries.
//
// The policy is a pure function of the attempt number: base * 2^(attempt-1),
// optionally clamped to a ceiling. Stream reconnects use a 60 second ceiling;
// webhook retries are uncapped and bounded by their attempt count instead.

use std::time::Duration;

/// Default ceiling for stream reconnect delays.
pub const RECONNECT_CEILING: Duration = Duration::from_secs(60);

/// Maps an attempt number to how long to wait before that attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Option<Duration>,
}

impl BackoffPolicy {
    /// Exponential backoff clamped to `ceiling`.
    pub fn capped(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: Some(ceiling),
        }
    }

    /// Exponential backoff with no ceiling. Callers bound it by attempt count.
    pub fn uncapped(base: Duration) -> Self {
        Self {
            base,
            ceiling: None,
        }
    }

    /// The stream reconnect schedule: `base` doubling up to one minute.
    pub fn reconnect(base: Duration) -> Self {
        Self::capped(base, RECONNECT_CEILING)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Option<Duration> {
        self.ceiling
    }

    /// Delay before the given 1-based attempt.
    ///
    /// Attempt 0 is treated as attempt 1. The multiplication saturates
    /// instead of overflowing, so very large attempt numbers simply land on
    /// the ceiling (or `Duration::MAX` when uncapped).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let raw = self.base.saturating_mul(factor);

        match self.ceiling {
            Some(ceiling) => raw.min(ceiling),
            None => raw,
        }
    }
}
