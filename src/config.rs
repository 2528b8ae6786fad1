use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::backoff::BackoffPolicy;
use crate::ingest::budget::DEFAULT_WINDOW;
use crate::ingest::{IngestionMode, PollingConfig, StreamingConfig};
use crate::twitter::client::DEFAULT_API_URL;
use crate::webhook::sink::is_valid_url;
use crate::webhook::WebhookConfig;

/// The example value from the sample `.env`, never a real endpoint.
pub const PLACEHOLDER_WEBHOOK_URL: &str = "https://webhook.site/your-unique-url";

/// Shortest polling interval accepted.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(60);

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines (`LOG_FORMAT=combined`, the default).
    Text,
    /// One JSON object per line (`LOG_FORMAT=json`).
    Json,
}

/// Every problem found while loading configuration.
#[derive(Debug, thiserror::Error)]
#[error("Configuration validation failed:\n  - {}", .problems.join("\n  - "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Central configuration loaded from environment variables.
///
/// Secrets only come from the environment. The .env file is loaded at
/// startup via dotenvy before this runs.
#[derive(Clone)]
pub struct Config {
    pub bearer_token: String,
    /// Account to watch, without the leading `@`.
    pub target_username: String,
    pub api_base_url: String,
    pub webhook_url: String,
    pub mode: IngestionMode,

    pub polling_interval: Duration,
    pub max_results: u32,
    pub max_requests_per_window: u32,
    pub skip_startup_api_tests: bool,

    pub webhook_timeout: Duration,
    pub webhook_retries: u32,
    pub webhook_retry_delay: Duration,

    pub stream_reconnect_attempts: u32,
    pub stream_reconnect_delay: Duration,
    pub stream_keepalive_timeout: Duration,

    pub port: u16,
    pub health_enabled: bool,
    pub log_level: String,
    pub log_format: LogFormat,
    pub environment: String,
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn load() -> Result<Self> {
        Ok(Self::from_lookup(|key| env::var(key).ok())?)
    }

    /// Build a config from any key lookup, collecting every problem.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();
        let mut vars = Vars {
            lookup: &lookup,
            problems: &mut problems,
        };

        let mode = match vars.get("MENTION_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                vars.problems.push(format!("MENTION_MODE: {e}"));
                IngestionMode::Polling
            }),
            None => IngestionMode::Polling,
        };

        let config = Config {
            bearer_token: vars.get("TWITTER_BEARER_TOKEN").unwrap_or_default(),
            target_username: vars
                .get("TWITTER_TARGET_USERNAME")
                .map(|u| u.trim_start_matches('@').to_string())
                .unwrap_or_default(),
            api_base_url: vars
                .get("TWITTER_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            webhook_url: vars.get("WEBHOOK_URL").unwrap_or_default(),
            mode,
            polling_interval: vars.millis("POLLING_INTERVAL_MS", 300_000),
            max_results: vars.number("MAX_RESULTS", 10),
            max_requests_per_window: vars.number("RATE_LIMIT_MAX_REQUESTS", 300),
            skip_startup_api_tests: vars.get("SKIP_STARTUP_API_TESTS").as_deref() == Some("true"),
            webhook_timeout: vars.millis("WEBHOOK_TIMEOUT", 10_000),
            webhook_retries: vars.number("WEBHOOK_RETRIES", 3),
            webhook_retry_delay: vars.millis("WEBHOOK_RETRY_DELAY", 1_000),
            stream_reconnect_attempts: vars.number("STREAM_RECONNECT_ATTEMPTS", 10),
            stream_reconnect_delay: vars.millis("STREAM_RECONNECT_DELAY", 1_000),
            stream_keepalive_timeout: vars.millis("STREAM_KEEPALIVE_TIMEOUT", 20_000),
            port: vars.number("PORT", 3000),
            health_enabled: vars.get("HEALTH_CHECK_ENABLED").as_deref() != Some("false"),
            log_level: vars.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: match vars.get("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            environment: vars
                .get("APP_ENV")
                .unwrap_or_else(|| "development".to_string()),
        };

        problems.extend(config.problems());
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError { problems })
        }
    }

    /// Re-check the semantic rules, e.g. after a CLI override.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.bearer_token.is_empty() {
            problems.push("TWITTER_BEARER_TOKEN is required".to_string());
        }
        if self.target_username.is_empty() {
            problems.push("TWITTER_TARGET_USERNAME is required".to_string());
        }

        if self.webhook_url.is_empty() {
            problems.push("WEBHOOK_URL is required".to_string());
        } else if self.webhook_url == PLACEHOLDER_WEBHOOK_URL {
            problems.push("WEBHOOK_URL is still the example URL, set your real endpoint".to_string());
        } else if !is_valid_url(&self.webhook_url) {
            problems.push("WEBHOOK_URL must be a valid http(s) URL".to_string());
        }

        if self.polling_interval < MIN_POLLING_INTERVAL {
            problems.push(format!(
                "POLLING_INTERVAL_MS must be at least {} (got {})",
                MIN_POLLING_INTERVAL.as_millis(),
                self.polling_interval.as_millis()
            ));
        }
        if !(10..=100).contains(&self.max_results) {
            problems.push(format!(
                "MAX_RESULTS must be between 10 and 100 (got {})",
                self.max_results
            ));
        }

        problems
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            target_username: self.target_username.clone(),
            polling_interval: self.polling_interval,
            max_results: self.max_results,
            max_requests_per_window: self.max_requests_per_window,
            rate_limit_window: DEFAULT_WINDOW,
            skip_connection_test: self.skip_startup_api_tests,
        }
    }

    pub fn streaming_config(&self) -> StreamingConfig {
        StreamingConfig {
            target_username: self.target_username.clone(),
            max_reconnect_attempts: self.stream_reconnect_attempts,
            reconnect_backoff: BackoffPolicy::reconnect(self.stream_reconnect_delay),
            keep_alive_timeout: self.stream_keepalive_timeout,
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            url: self.webhook_url.clone(),
            timeout: self.webhook_timeout,
            max_retries: self.webhook_retries,
            retry_delay: self.webhook_retry_delay,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.bearer_token.is_empty() {
            "NOT_SET"
        } else {
            "[REDACTED]"
        };
        f.debug_struct("Config")
            .field("bearer_token", &token)
            .field("target_username", &self.target_username)
            .field("api_base_url", &self.api_base_url)
            .field("webhook_url", &self.webhook_url)
            .field("mode", &self.mode)
            .field("polling_interval", &self.polling_interval)
            .field("max_results", &self.max_results)
            .field("max_requests_per_window", &self.max_requests_per_window)
            .field("skip_startup_api_tests", &self.skip_startup_api_tests)
            .field("webhook_timeout", &self.webhook_timeout)
            .field("webhook_retries", &self.webhook_retries)
            .field("webhook_retry_delay", &self.webhook_retry_delay)
            .field("stream_reconnect_attempts", &self.stream_reconnect_attempts)
            .field("stream_reconnect_delay", &self.stream_reconnect_delay)
            .field("stream_keepalive_timeout", &self.stream_keepalive_timeout)
            .field("port", &self.port)
            .field("health_enabled", &self.health_enabled)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("environment", &self.environment)
            .finish()
    }
}

/// Env lookup that records unparseable values instead of failing fast.
struct Vars<'a, F> {
    lookup: &'a F,
    problems: &'a mut Vec<String>,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// A trimmed, non-empty value.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number<T: FromStr>(&mut self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                self.problems
                    .push(format!("{key} must be a non-negative integer (got '{raw}')"));
                default
            }),
            None => default,
        }
    }

    fn millis(&mut self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.number(key, default_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = Config::from_lookup(lookup(&[
            ("TWITTER_BEARER_TOKEN", "super-secret"),
            ("TWITTER_TARGET_USERNAME", "bot"),
            ("WEBHOOK_URL", "https://hooks.example.com/x"),
        ]))
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
