// Request budget for the recent-search endpoint.
//
// The search endpoint allows a fixed number of requests per 15-minute
// window. The budget counts requests issued by one polling source and
// refuses new ones once the maximum is reached. It does not roll over on
// its own; `reset` starts a fresh window explicitly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The recent-search window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Default requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 300;

#[derive(Debug, Clone)]
pub struct RequestBudget {
    used: u32,
    max: u32,
    window: Duration,
    window_start: DateTime<Utc>,
}

/// Serializable view of a budget for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub used: u32,
    pub max: u32,
    pub remaining: u32,
    pub window_secs: u64,
    pub window_start: DateTime<Utc>,
}

impl RequestBudget {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            used: 0,
            max,
            window,
            window_start: Utc::now(),
        }
    }

    /// Whether another request fits in the budget.
    pub fn can_request(&self) -> bool {
        self.used < self.max
    }

    /// Count one issued request.
    pub fn record(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    /// Zero the counter and start a new window at `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.used = 0;
        self.window_start = now;
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            used: self.used,
            max: self.max,
            remaining: self.remaining(),
            window_secs: self.window.as_secs(),
            window_start: self.window_start,
        }
    }
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
