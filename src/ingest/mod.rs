// Mention ingestion: the two interchangeable strategies and what they share.
//
// Both strategies implement `IngestionSource`, so the engine holds a single
// `Arc<dyn IngestionSource>` and never branches on the mode after startup.
// Sources own their state behind a std Mutex and run their background work
// on one spawned tokio task each.

pub mod budget;
pub mod polling;
pub mod streaming;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use crate::mention::MentionEvent;

pub use polling::{PollOutcome, PollStatus, PollingConfig, PollingSource};
pub use streaming::{ConnectionState, StreamStatus, StreamingConfig, StreamingSource};

/// Called once per detected mention. Sources await it before moving on.
pub type MentionHandler = Arc<dyn Fn(MentionEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Called for errors the source recovers from on its own.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Called with the attempt number before each stream reconnect attempt.
pub type ReconnectHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// Which ingestion strategy is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMode {
    Polling,
    Streaming,
}

impl IngestionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionMode::Polling => "polling",
            IngestionMode::Streaming => "streaming",
        }
    }
}

impl fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(IngestionMode::Polling),
            "streaming" | "stream" => Ok(IngestionMode::Streaming),
            other => Err(format!(
                "unknown ingestion mode '{other}' (expected polling or streaming)"
            )),
        }
    }
}

/// Point-in-time snapshot of a source's state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IngestionStatus {
    Polling(PollStatus),
    Streaming(StreamStatus),
}

/// Failures a source reports through the error handler rather than returning.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Stream reconnection gave up after {attempts} attempts")]
    ReconnectLimitExceeded { attempts: u32 },
}

/// A mention ingestion strategy.
#[async_trait]
pub trait IngestionSource: Send + Sync {
    fn mode(&self) -> IngestionMode;

    /// Register the mention handler, replacing any previous one.
    fn on_mention(&self, handler: MentionHandler);

    /// Register the error handler, replacing any previous one.
    fn on_error(&self, handler: ErrorHandler);

    /// Begin ingesting. A no-op when already started.
    async fn start(&self) -> Result<()>;

    /// Stop ingesting and cancel pending timers. Idempotent.
    async fn stop(&self);

    fn status(&self) -> IngestionStatus;
}

/// Lock a std mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registered callbacks, shared by both source implementations.
#[derive(Default)]
pub(crate) struct Handlers {
    mention: Mutex<Option<MentionHandler>>,
    error: Mutex<Option<ErrorHandler>>,
}

impl Handlers {
    pub(crate) fn set_mention(&self, handler: MentionHandler) {
        *lock(&self.mention) = Some(handler);
    }

    pub(crate) fn set_error(&self, handler: ErrorHandler) {
        *lock(&self.error) = Some(handler);
    }

    pub(crate) async fn emit_mention(&self, mention: MentionEvent) {
        let handler = lock(&self.mention).clone();
        match handler {
            Some(handler) => handler(mention).await,
            None => debug!(tweet_id = %mention.id, "No mention handler registered, dropping"),
        }
    }

    pub(crate) fn emit_error(&self, err: &anyhow::Error) {
        let handler = lock(&self.error).clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }
}
