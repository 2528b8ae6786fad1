// Twitter API v2 client. Bearer-token auth over plain reqwest.
//
// A thin wrapper in the same shape as the other HTTP clients: one shared
// reqwest::Client, a base URL, and a couple of generic JSON helpers. Non-2xx
// responses become typed `ApiError`s so callers can spot rate limits.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::error::{ApiError, RateLimitInfo};
use super::stream::{self, StreamEvents};
use super::traits::{FilteredStream, MentionSearch};
use super::types::{
    AddRulesResponse, NewRule, RulesResponse, SearchPage, SearchQuery, StreamRule, EXPANSIONS,
    TWEET_FIELDS, USER_FIELDS,
};

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.twitter.com";

const SEARCH_PATH: &str = "2/tweets/search/recent";
const RULES_PATH: &str = "2/tweets/search/stream/rules";
const STREAM_PATH: &str = "2/tweets/search/stream";

/// Timeout for ordinary request/response calls. The stream itself has none.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TwitterClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TwitterClient {
    /// Create a client for the given base URL (pass a mock server URL in tests).
    pub fn new(base_url: &str, bearer_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mentionwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// GET an endpoint and deserialize the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        debug!(endpoint = path, "Twitter API GET");

        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.bearer_token)
            .timeout(REQUEST_TIMEOUT)
            .query(params)
            .send()
            .await
            .with_context(|| format!("Twitter API request failed: {path}"))?;

        let response = check_status(response, path).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {path} response"))
    }

    /// POST a JSON body and deserialize the JSON response.
    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(endpoint = path, "Twitter API POST");

        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.bearer_token)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Twitter API request failed: {path}"))?;

        let response = check_status(response, path).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {path} response"))
    }

    /// Run one recent-search query.
    pub async fn search_recent(&self, query: &SearchQuery) -> Result<SearchPage> {
        let max_results = query.max_results.to_string();
        let start_time = query
            .start_time
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        self.get_json(
            SEARCH_PATH,
            &[
                ("query", query.query.as_str()),
                ("max_results", &max_results),
                ("tweet.fields", TWEET_FIELDS),
                ("user.fields", USER_FIELDS),
                ("expansions", EXPANSIONS),
                ("start_time", &start_time),
            ],
        )
        .await
    }

    pub async fn stream_rules(&self) -> Result<Vec<StreamRule>> {
        let resp: RulesResponse = self.get_json(RULES_PATH, &[]).await?;
        Ok(resp.data)
    }

    pub async fn delete_stream_rules(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .post_json(RULES_PATH, &json!({ "delete": { "ids": ids } }))
            .await?;
        Ok(())
    }

    pub async fn add_stream_rules(&self, rules: &[NewRule]) -> Result<AddRulesResponse> {
        self.post_json(RULES_PATH, &json!({ "add": rules })).await
    }

    /// Open the filtered stream and decode it into events.
    pub async fn open_stream(&self, keep_alive: Duration) -> Result<StreamEvents> {
        debug!(endpoint = STREAM_PATH, "Opening filtered stream");

        let response = self
            .client
            .get(self.url(STREAM_PATH))
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("tweet.fields", TWEET_FIELDS),
                ("user.fields", USER_FIELDS),
                ("expansions", EXPANSIONS),
            ])
            .send()
            .await
            .context("Failed to connect to filtered stream")?;

        let response = check_status(response, STREAM_PATH).await?;
        Ok(stream::decode(response.bytes_stream(), keep_alive))
    }
}

/// Turn a non-2xx response into a typed `ApiError`.
async fn check_status(response: reqwest::Response, endpoint: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let info = RateLimitInfo::from_headers(response.headers());
        return Err(ApiError::RateLimited {
            endpoint: endpoint.to_string(),
            info,
        }
        .into());
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    }
    .into())
}

#[async_trait]
impl MentionSearch for TwitterClient {
    /// One minimal search. Burns a request, which is why startup can skip it.
    async fn check_connection(&self) -> Result<()> {
        let _: SearchPage = self
            .get_json(SEARCH_PATH, &[("query", "twitter"), ("max_results", "10")])
            .await
            .context("Twitter API connection check failed")?;
        Ok(())
    }

    async fn search_mentions(&self, query: &SearchQuery) -> Result<SearchPage> {
        self.search_recent(query).await
    }
}

#[async_trait]
impl FilteredStream for TwitterClient {
    async fn list_rules(&self) -> Result<Vec<StreamRule>> {
        self.stream_rules().await
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<()> {
        self.delete_stream_rules(ids).await
    }

    async fn add_rule(&self, rule: &NewRule) -> Result<AddRulesResponse> {
        self.add_stream_rules(std::slice::from_ref(rule)).await
    }

    async fn connect(&self, keep_alive: Duration) -> Result<StreamEvents> {
        self.open_stream(keep_alive).await
    }
}
