// Typed Twitter API errors.
//
// Most failures travel as plain anyhow errors with context. The two cases a
// caller has to branch on get a concrete type so they can be recovered from
// the anyhow chain: a 429 with rate-limit headers, and any other non-2xx
// status.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

/// Rate-limit metadata from the `x-rate-limit-*` response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// When the current window resets (header carries epoch seconds).
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| -> Option<i64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        Self {
            limit: number("x-rate-limit-limit").and_then(|v| u32::try_from(v).ok()),
            remaining: number("x-rate-limit-remaining").and_then(|v| u32::try_from(v).ok()),
            reset: number("x-rate-limit-reset")
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Twitter API rate limit exceeded on {endpoint}")]
    RateLimited {
        endpoint: String,
        info: RateLimitInfo,
    },

    #[error("Twitter API {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
}

impl ApiError {
    /// The reset time, if this is a rate-limit error that carried one.
    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        match self {
            ApiError::RateLimited { info, .. } => info.reset,
            ApiError::Status { .. } => None,
        }
    }
}

/// Walk an error chain looking for a rate-limit reset time.
pub fn rate_limit_reset(err: &anyhow::Error) -> Option<DateTime<Utc>> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .and_then(ApiError::rate_limit_reset)
}
