// Engine: wires one ingestion source to the webhook sink.
//
// The source is chosen once from configuration and never switched at
// runtime. Every mention becomes one webhook delivery; ingestion errors are
// logged and never take the process down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::ingest::{
    IngestionMode, IngestionSource, IngestionStatus, PollingSource, StreamingSource,
};
use crate::mention::MentionEvent;
use crate::twitter::client::TwitterClient;
use crate::webhook::{DeliveryResult, MentionEnvelope, WebhookInfo, WebhookSink};

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub mode: IngestionMode,
    pub target_user: String,
    pub ingestion: IngestionStatus,
    pub webhook: WebhookInfo,
}

pub struct Engine {
    source: Arc<dyn IngestionSource>,
    sink: Arc<WebhookSink>,
    target_user: String,
    running: AtomicBool,
}

impl Engine {
    pub fn new(
        source: Arc<dyn IngestionSource>,
        sink: Arc<WebhookSink>,
        target_user: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sink,
            target_user: target_user.into(),
            running: AtomicBool::new(false),
        }
    }

    /// Build the Twitter client, the configured source and the HTTP sink.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Arc::new(TwitterClient::new(
            &config.api_base_url,
            &config.bearer_token,
        )?);

        let source: Arc<dyn IngestionSource> = match config.mode {
            IngestionMode::Polling => {
                Arc::new(PollingSource::new(client, config.polling_config()))
            }
            IngestionMode::Streaming => {
                Arc::new(StreamingSource::new(client, config.streaming_config()))
            }
        };
        let sink = Arc::new(WebhookSink::http(config.webhook_config())?);

        Ok(Self::new(source, sink, config.target_username.clone()))
    }

    pub fn mode(&self) -> IngestionMode {
        self.source.mode()
    }

    pub fn target_user(&self) -> &str {
        &self.target_user
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register handlers and start the source.
    pub async fn start(&self) -> Result<()> {
        let mode = self.source.mode();
        let sink = Arc::clone(&self.sink);
        let target_user = self.target_user.clone();

        self.source.on_mention(Arc::new(move |mention: MentionEvent| {
            let sink = Arc::clone(&sink);
            let target_user = target_user.clone();
            async move {
                let author = mention
                    .author
                    .as_ref()
                    .map(|a| a.username.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                info!(tweet_id = %mention.id, author = %author, "Forwarding mention");

                let envelope = MentionEnvelope::new(&mention, &target_user, mode);
                let result = sink.send_envelope(&envelope).await;
                if result.success {
                    info!(tweet_id = %mention.id, attempts = result.attempts, "Mention delivered");
                } else {
                    error!(
                        tweet_id = %mention.id,
                        attempts = result.attempts,
                        status = ?result.status,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Mention delivery failed"
                    );
                }
            }
            .boxed()
        }));

        self.source.on_error(Arc::new(|err: &anyhow::Error| {
            error!(error = %format!("{err:#}"), "Ingestion error");
        }));

        self.source
            .start()
            .await
            .with_context(|| format!("Failed to start {mode} ingestion"))?;

        self.running.store(true, Ordering::SeqCst);
        info!(mode = %mode, target_user = %self.target_user, "Engine started");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Engine stop requested while not running");
        }
        self.source.stop().await;
        info!("Engine stopped");
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            mode: self.source.mode(),
            target_user: self.target_user.clone(),
            ingestion: self.source.status(),
            webhook: self.sink.info(),
        }
    }

    pub async fn send_test(&self) -> DeliveryResult {
        self.sink.send_test(&self.target_user).await
    }
}
