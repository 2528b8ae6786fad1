// API seams for the two ingestion strategies.
//
// The polling source only needs recent search; the streaming source only
// needs rule management and a connection. `TwitterClient` implements both;
// tests substitute scripted fakes so scheduling and reconnect logic can run
// against a paused clock without touching the network.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::stream::StreamEvents;
use super::types::{AddRulesResponse, NewRule, SearchPage, SearchQuery, StreamRule};

/// Recent-search access used by the polling source.
#[async_trait]
pub trait MentionSearch: Send + Sync {
    /// Cheap credential check run on startup. Defaults to a no-op.
    async fn check_connection(&self) -> Result<()> {
        Ok(())
    }

    /// Run one search query.
    async fn search_mentions(&self, query: &SearchQuery) -> Result<SearchPage>;
}

/// Filtered-stream access used by the streaming source.
#[async_trait]
pub trait FilteredStream: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<StreamRule>>;

    async fn delete_rules(&self, ids: &[String]) -> Result<()>;

    async fn add_rule(&self, rule: &NewRule) -> Result<AddRulesResponse>;

    /// Open the stream. The returned events start with `Connected`.
    async fn connect(&self, keep_alive: Duration) -> Result<StreamEvents>;
}
