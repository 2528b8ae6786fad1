// Stream-mode ingestion: one persistent filtered-stream connection.
//
// Starting installs exactly one rule (`@target`, tagged "mentions") after
// clearing whatever rules the app already had, then opens the stream. A
// supervisor task reads events and, when the connection drops, reconnects
// with exponential backoff until the attempt limit is reached. Stopping
// cancels the supervisor (dropping the connection and any pending reconnect
// wait) and removes the rules again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    lock, ErrorHandler, Handlers, IngestError, IngestionMode, IngestionSource, IngestionStatus,
    MentionHandler, ReconnectHandler,
};
use crate::backoff::BackoffPolicy;
use crate::mention::MentionEvent;
use crate::twitter::stream::{StreamEvent, StreamEvents};
use crate::twitter::traits::FilteredStream;
use crate::twitter::types::NewRule;

/// Tag attached to the mention rule.
pub const RULE_TAG: &str = "mentions";

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub target_username: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: BackoffPolicy,
    /// Silence longer than this counts as a lost connection.
    pub keep_alive_timeout: Duration,
}

impl StreamingConfig {
    pub fn new(target_username: impl Into<String>) -> Self {
        Self {
            target_username: target_username.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: BackoffPolicy::reconnect(DEFAULT_RECONNECT_DELAY),
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub has_stream: bool,
    pub target_user: String,
}

struct StreamState {
    connection: ConnectionState,
    reconnect_attempts: u32,
    /// Present while a session (supervisor task) is alive.
    session: Option<CancellationToken>,
    /// Our rule is installed on the server and should be removed on stop.
    rules_installed: bool,
}

struct Shared {
    api: Arc<dyn FilteredStream>,
    config: StreamingConfig,
    state: Mutex<StreamState>,
    handlers: Handlers,
    on_reconnect: Mutex<Option<ReconnectHandler>>,
}

enum PumpExit {
    Cancelled,
    Disconnected,
}

/// Filtered-stream ingestion source.
pub struct StreamingSource {
    shared: Arc<Shared>,
}

impl StreamingSource {
    pub fn new(api: Arc<dyn FilteredStream>, config: StreamingConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                state: Mutex::new(StreamState {
                    connection: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    session: None,
                    rules_installed: false,
                }),
                handlers: Handlers::default(),
                on_reconnect: Mutex::new(None),
            }),
        }
    }

    /// Register a callback fired before each reconnect attempt.
    pub fn on_reconnect(&self, handler: ReconnectHandler) {
        *lock(&self.shared.on_reconnect) = Some(handler);
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.shared.status()
    }
}

impl Shared {
    fn set_connection(&self, connection: ConnectionState) {
        lock(&self.state).connection = connection;
    }

    fn rule(&self) -> NewRule {
        NewRule {
            value: format!("@{}", self.config.target_username),
            tag: RULE_TAG.to_string(),
        }
    }

    /// Clear existing rules, install ours, and connect.
    async fn open_session(&self) -> Result<StreamEvents> {
        self.set_connection(ConnectionState::Connecting);

        self.clear_rules().await?;

        let rule = self.rule();
        let added = self
            .api
            .add_rule(&rule)
            .await
            .context("Failed to add stream rule")?;
        for problem in &added.errors {
            warn!(problem = %problem, "Stream rule warning");
        }
        lock(&self.state).rules_installed = true;
        info!(rule = %rule.value, tag = RULE_TAG, "Stream rule installed");

        self.api
            .connect(self.config.keep_alive_timeout)
            .await
            .context("Failed to open filtered stream")
    }

    async fn clear_rules(&self) -> Result<()> {
        let existing = self
            .api
            .list_rules()
            .await
            .context("Failed to list stream rules")?;
        if existing.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        self.api
            .delete_rules(&ids)
            .await
            .context("Failed to delete stream rules")?;
        debug!(count = ids.len(), "Removed stream rules");
        Ok(())
    }

    /// Undo a session that finished opening after `stop()` ran.
    async fn abandon_session(&self) {
        debug!("Stream stopped while connecting, removing rules");
        match self.clear_rules().await {
            Ok(()) => lock(&self.state).rules_installed = false,
            Err(err) => warn!(error = %format!("{err:#}"), "Failed to clean up stream rules"),
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    async fn supervise(self: Arc<Self>, mut events: StreamEvents, token: CancellationToken) {
        loop {
            if let PumpExit::Cancelled = self.pump(&mut events, &token).await {
                break;
            }
            match self.reconnect(&token).await {
                Some(next) => events = next,
                None => break,
            }
        }
        debug!("Stream supervisor exiting");
    }

    /// Read events until the connection ends or the session is cancelled.
    async fn pump(&self, events: &mut StreamEvents, token: &CancellationToken) -> PumpExit {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return PumpExit::Cancelled,
                event = events.next() => event,
            };

            match event {
                Some(StreamEvent::Connected) => {
                    {
                        let mut state = lock(&self.state);
                        state.reconnect_attempts = 0;
                        state.connection = ConnectionState::Connected;
                    }
                    info!(target_user = %self.config.target_username, "Filtered stream connected");
                }
                Some(StreamEvent::Data(payload)) => {
                    let payload = *payload;
                    if let Some(tweet) = payload.data {
                        let mention = MentionEvent::resolve(tweet, &payload.includes);
                        info!(tweet_id = %mention.id, "Mention received from stream");
                        self.handlers.emit_mention(mention).await;
                    }
                }
                Some(StreamEvent::KeepAlive) => debug!("Stream keep-alive"),
                Some(StreamEvent::Malformed(reason)) => {
                    error!(reason = %reason, "Skipping malformed stream line");
                }
                Some(StreamEvent::ConnectionLost) => {
                    warn!(
                        timeout_ms = self.config.keep_alive_timeout.as_millis() as u64,
                        "No data within keep-alive timeout, connection lost"
                    );
                    self.set_connection(ConnectionState::Disconnected);
                    return PumpExit::Disconnected;
                }
                Some(StreamEvent::ConnectionError(err)) => {
                    error!(error = %format!("{err:#}"), "Filtered stream error");
                    self.set_connection(ConnectionState::Disconnected);
                    self.handlers.emit_error(&err);
                    return PumpExit::Disconnected;
                }
                Some(StreamEvent::ConnectionClosed) | None => {
                    warn!("Filtered stream closed by server");
                    self.set_connection(ConnectionState::Disconnected);
                    return PumpExit::Disconnected;
                }
            }
        }
    }

    /// Back off and reopen the session. `None` means give up or cancelled.
    async fn reconnect(&self, token: &CancellationToken) -> Option<StreamEvents> {
        let max = self.config.max_reconnect_attempts;
        loop {
            let attempt = {
                let mut state = lock(&self.state);
                if state.reconnect_attempts >= max {
                    None
                } else {
                    state.reconnect_attempts += 1;
                    state.connection = ConnectionState::ReconnectPending;
                    Some(state.reconnect_attempts)
                }
            };

            let Some(attempt) = attempt else {
                let err = anyhow::Error::new(IngestError::ReconnectLimitExceeded { attempts: max });
                error!(attempts = max, "Giving up on filtered stream");
                {
                    let mut state = lock(&self.state);
                    state.connection = ConnectionState::Disconnected;
                    if !token.is_cancelled() {
                        state.session = None;
                    }
                }
                self.handlers.emit_error(&err);
                return None;
            };

            let delay = self.config.reconnect_backoff.delay(attempt);
            info!(
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to filtered stream"
            );
            let hook = lock(&self.on_reconnect).clone();
            if let Some(hook) = hook {
                hook(attempt);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open_session().await {
                Ok(events) if token.is_cancelled() => {
                    drop(events);
                    self.abandon_session().await;
                    return None;
                }
                Ok(events) => return Some(events),
                Err(err) => {
                    error!(attempt, error = %format!("{err:#}"), "Reconnect failed");
                    self.set_connection(ConnectionState::Disconnected);
                    self.handlers.emit_error(&err);
                }
            }

            if token.is_cancelled() {
                return None;
            }
        }
    }

    fn status(&self) -> StreamStatus {
        let state = lock(&self.state);
        StreamStatus {
            is_connected: state.connection == ConnectionState::Connected,
            connection_state: state.connection,
            reconnect_attempts: state.reconnect_attempts,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            has_stream: state.session.is_some(),
            target_user: self.config.target_username.clone(),
        }
    }
}

#[async_trait]
impl IngestionSource for StreamingSource {
    fn mode(&self) -> IngestionMode {
        IngestionMode::Streaming
    }

    fn on_mention(&self, handler: MentionHandler) {
        self.shared.handlers.set_mention(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.shared.handlers.set_error(handler);
    }

    async fn start(&self) -> Result<()> {
        let token = {
            let mut state = lock(&self.shared.state);
            if state.session.is_some() {
                debug!("Filtered stream already active");
                return Ok(());
            }
            let token = CancellationToken::new();
            state.session = Some(token.clone());
            state.reconnect_attempts = 0;
            token
        };

        match self.shared.open_session().await {
            Ok(events) if token.is_cancelled() => {
                drop(events);
                self.shared.abandon_session().await;
                Ok(())
            }
            Ok(events) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(shared.supervise(events, token));
                Ok(())
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "Failed to start filtered stream");
                let mut state = lock(&self.shared.state);
                state.connection = ConnectionState::Disconnected;
                if !token.is_cancelled() {
                    state.session = None;
                }
                Err(err)
            }
        }
    }

    async fn stop(&self) {
        let (token, rules_installed) = {
            let mut state = lock(&self.shared.state);
            (state.session.take(), state.rules_installed)
        };
        if token.is_none() && !rules_installed {
            return;
        }
        if let Some(token) = token {
            token.cancel();
        }

        match self.shared.clear_rules().await {
            Ok(()) => lock(&self.shared.state).rules_installed = false,
            Err(err) => warn!(error = %format!("{err:#}"), "Failed to clean up stream rules"),
        }

        self.shared.set_connection(ConnectionState::Disconnected);
        info!("Filtered stream stopped");
    }

    fn status(&self) -> IngestionStatus {
        IngestionStatus::Streaming(self.shared.status())
    }
}
