// Webhook delivery with bounded exponential-backoff retries.
//
// `send` never fails: every outcome, including exhausted retries, comes
// back as a `DeliveryResult`. Non-2xx responses count as failures and are
// retried the same way as transport errors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use super::payload::{TestEnvelope, BOT_NAME, MENTION_EVENT, VERSION};
use crate::backoff::BackoffPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What came back from one POST.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Response body, parsed as JSON when possible, otherwise a string.
    pub body: Option<Value>,
}

/// Carries one webhook POST. Errors mean no response was received.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &Value, event_type: &str) -> Result<TransportResponse>;
}

/// reqwest-backed transport with a per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{BOT_NAME}/{VERSION}"))
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, url: &str, payload: &Value, event_type: &str) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .header("X-Bot-Name", BOT_NAME)
            .header("X-Event-Type", event_type)
            .json(payload)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("Failed to read webhook response")?;

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };

        Ok(TransportResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay of the retry backoff.
    pub retry_delay: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Outcome of a delivery, after all retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    /// Status of the last response, if any arrived.
    pub status: Option<u16>,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Attempts made, including the first. Serialized as `retries` to match
    /// what existing receivers read.
    #[serde(rename = "retries")]
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookInfo {
    pub url: String,
    pub is_valid: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

/// Whether `url` parses and uses http or https.
pub fn is_valid_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

pub struct WebhookSink {
    config: WebhookConfig,
    transport: Arc<dyn WebhookTransport>,
    backoff: BackoffPolicy,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        let backoff = BackoffPolicy::uncapped(config.retry_delay);
        Self {
            config,
            transport,
            backoff,
        }
    }

    /// A sink that POSTs over HTTP.
    pub fn http(config: WebhookConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Deliver `payload`, retrying failures with exponential backoff.
    pub async fn send(&self, payload: &Value) -> DeliveryResult {
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or(MENTION_EVENT);
        let total = self.config.max_retries.saturating_add(1);
        debug!(event = event_type, payload = %payload, "Webhook payload");

        let mut attempt: u32 = 1;
        loop {
            info!(attempt, total, event = event_type, "Sending webhook");

            let (status, message) = match self
                .transport
                .post(&self.config.url, payload, event_type)
                .await
            {
                Ok(response) if (200..300).contains(&response.status) => {
                    info!(status = response.status, attempt, "Webhook delivered");
                    return DeliveryResult {
                        success: true,
                        status: Some(response.status),
                        data: response.body,
                        error: None,
                        attempts: attempt,
                    };
                }
                Ok(response) => {
                    debug!(status = response.status, body = ?response.body, "Webhook rejected");
                    (
                        Some(response.status),
                        format!("Webhook responded with HTTP {}", response.status),
                    )
                }
                Err(err) => (None, format!("{err:#}")),
            };

            error!(attempt, total, status = ?status, error = %message, "Webhook delivery failed");

            if attempt > self.config.max_retries {
                error!(attempts = attempt, "Webhook retries exhausted");
                return DeliveryResult {
                    success: false,
                    status,
                    data: None,
                    error: Some(message),
                    attempts: attempt,
                };
            }

            let delay = self.backoff.delay(attempt);
            info!(delay_ms = delay.as_millis() as u64, "Retrying webhook");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Serialize an envelope and deliver it.
    pub async fn send_envelope<T: Serialize + Sync>(&self, envelope: &T) -> DeliveryResult {
        match serde_json::to_value(envelope) {
            Ok(payload) => self.send(&payload).await,
            Err(err) => {
                error!(error = %err, "Failed to serialize webhook payload");
                DeliveryResult {
                    success: false,
                    status: None,
                    data: None,
                    error: Some(format!("Failed to serialize payload: {err}")),
                    attempts: 0,
                }
            }
        }
    }

    /// Deliver the test envelope.
    pub async fn send_test(&self, target_user: &str) -> DeliveryResult {
        info!("Sending test webhook");
        self.send_envelope(&TestEnvelope::new(target_user)).await
    }

    pub fn info(&self) -> WebhookInfo {
        WebhookInfo {
            url: self.config.url.clone(),
            is_valid: is_valid_url(&self.config.url),
            timeout_ms: self.config.timeout.as_millis() as u64,
            max_retries: self.config.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation_requires_http_scheme() {
        assert!(is_valid_url("https://hooks.example.com/abc"));
        assert!(is_valid_url("http://localhost:8080/hook"));
        assert!(!is_valid_url("ftp://example.com/hook"));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url(""));
    }
}
