// Shared fakes for the integration tests.
//
// Each fake records what it was asked to do and replays a script of
// responses, so scheduling and retry behaviour can be checked against a
// paused tokio clock without any network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use serde_json::Value;

use mentionwatch::ingest::{ErrorHandler, MentionHandler};
use mentionwatch::mention::MentionEvent;
use mentionwatch::twitter::error::{ApiError, RateLimitInfo};
use mentionwatch::twitter::stream::{StreamEvent, StreamEvents};
use mentionwatch::twitter::traits::{FilteredStream, MentionSearch};
use mentionwatch::twitter::types::{
    AddRulesResponse, Includes, NewRule, SearchPage, SearchQuery, StreamPayload, StreamRule,
    Tweet, User,
};
use mentionwatch::webhook::sink::{TransportResponse, WebhookTransport};

// -- Builders --

pub fn tweet(id: &str, text: &str, author_id: &str) -> Tweet {
    Tweet {
        id: id.to_string(),
        text: text.to_string(),
        author_id: Some(author_id.to_string()),
        ..Default::default()
    }
}

pub fn user(id: &str, username: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        name: format!("{username} display"),
    }
}

pub fn page(tweets: Vec<Tweet>, users: Vec<User>) -> SearchPage {
    SearchPage {
        data: tweets,
        includes: Includes { users },
        meta: None,
    }
}

/// The error the real client produces for a 429 with a reset header.
pub fn rate_limited(reset: DateTime<Utc>) -> anyhow::Error {
    ApiError::RateLimited {
        endpoint: "2/tweets/search/recent".to_string(),
        info: RateLimitInfo {
            limit: Some(450),
            remaining: Some(0),
            reset: Some(reset),
        },
    }
    .into()
}

pub fn data_event(id: &str, author_id: &str, username: &str) -> StreamEvent {
    let payload = StreamPayload {
        data: Some(tweet(id, &format!("@bot mention {id}"), author_id)),
        includes: Includes {
            users: vec![user(author_id, username)],
        },
        ..Default::default()
    };
    StreamEvent::Data(Box::new(payload))
}

/// A connection that yields `events` and then ends.
pub fn finite(events: Vec<StreamEvent>) -> StreamEvents {
    stream::iter(events).boxed()
}

/// A connection that yields `events` and then stays open silently.
pub fn held_open(events: Vec<StreamEvent>) -> StreamEvents {
    stream::iter(events).chain(stream::pending()).boxed()
}

// -- Handlers --

pub fn recording_mentions() -> (MentionHandler, Arc<Mutex<Vec<MentionEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MentionHandler = Arc::new(move |mention: MentionEvent| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(mention);
        }
        .boxed()
    });
    (handler, seen)
}

pub fn recording_errors() -> (ErrorHandler, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ErrorHandler = Arc::new(move |err: &anyhow::Error| {
        sink.lock().unwrap().push(format!("{err:#}"));
    });
    (handler, seen)
}

// -- Recent search --

#[derive(Default)]
pub struct FakeSearch {
    responses: Mutex<VecDeque<Result<SearchPage>>>,
    queries: Mutex<Vec<SearchQuery>>,
    calls: AtomicU32,
    latency: Option<Duration>,
    reject_credentials: bool,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every search takes `latency` (on the tokio clock) to answer.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn rejecting_credentials() -> Self {
        Self {
            reject_credentials: true,
            ..Default::default()
        }
    }

    pub fn push_page(&self, page: SearchPage) {
        self.responses.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_error(&self, err: anyhow::Error) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MentionSearch for FakeSearch {
    async fn check_connection(&self) -> Result<()> {
        if self.reject_credentials {
            return Err(anyhow!("Twitter API 2/tweets/search/recent returned 401: Unauthorized"));
        }
        Ok(())
    }

    async fn search_mentions(&self, query: &SearchQuery) -> Result<SearchPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(SearchPage::default()))
    }
}

// -- Filtered stream --

#[derive(Default)]
pub struct FakeStream {
    connections: Mutex<VecDeque<StreamEvents>>,
    connects: AtomicU32,
    rules: Mutex<Vec<StreamRule>>,
    added: Mutex<Vec<NewRule>>,
    next_rule_id: AtomicU32,
    fail_add: bool,
    add_latency: Option<Duration>,
}

impl FakeStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_rule_add() -> Self {
        Self {
            fail_add: true,
            ..Default::default()
        }
    }

    /// Adding a rule takes `latency` (on the tokio clock).
    pub fn with_slow_rule_add(latency: Duration) -> Self {
        Self {
            add_latency: Some(latency),
            ..Default::default()
        }
    }

    /// Queue a connection. Once the queue is empty, connecting fails.
    pub fn push_connection(&self, events: StreamEvents) {
        self.connections.lock().unwrap().push_back(events);
    }

    pub fn seed_rule(&self, id: &str, value: &str) {
        self.rules.lock().unwrap().push(StreamRule {
            id: id.to_string(),
            value: value.to_string(),
            tag: None,
        });
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn rules(&self) -> Vec<StreamRule> {
        self.rules.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<NewRule> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl FilteredStream for FakeStream {
    async fn list_rules(&self) -> Result<Vec<StreamRule>> {
        Ok(self.rules())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<()> {
        self.rules.lock().unwrap().retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn add_rule(&self, rule: &NewRule) -> Result<AddRulesResponse> {
        if self.fail_add {
            return Err(anyhow!("Twitter API 2/tweets/search/stream/rules returned 403: Forbidden"));
        }
        if let Some(latency) = self.add_latency {
            tokio::time::sleep(latency).await;
        }
        let id = format!("rule-{}", self.next_rule_id.fetch_add(1, Ordering::SeqCst));
        let created = StreamRule {
            id,
            value: rule.value.clone(),
            tag: Some(rule.tag.clone()),
        };
        self.rules.lock().unwrap().push(created.clone());
        self.added.lock().unwrap().push(rule.clone());
        Ok(AddRulesResponse {
            data: vec![created],
            errors: Vec::new(),
        })
    }

    async fn connect(&self, _keep_alive: Duration) -> Result<StreamEvents> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.connections.lock().unwrap().pop_front();
        next.ok_or_else(|| anyhow!("connection refused"))
    }
}

// -- Webhook transport --

#[derive(Debug, Clone)]
pub struct Delivery {
    pub url: String,
    pub payload: Value,
    pub event_type: String,
}

/// Replays scripted responses; answers 200 once the script runs out.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<TransportResponse>>>,
    deliveries: Mutex<Vec<Delivery>>,
    always: Option<u16>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `status`.
    pub fn always(status: u16) -> Self {
        Self {
            always: Some(status),
            ..Default::default()
        }
    }

    pub fn push_status(&self, status: u16) {
        self.script.lock().unwrap().push_back(Ok(TransportResponse { status, body: None }));
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(anyhow!(message.to_string())));
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookTransport for FakeTransport {
    async fn post(&self, url: &str, payload: &Value, event_type: &str) -> Result<TransportResponse> {
        self.deliveries.lock().unwrap().push(Delivery {
            url: url.to_string(),
            payload: payload.clone(),
            event_type: event_type.to_string(),
        });

        if let Some(status) = self.always {
            return Ok(TransportResponse { status, body: None });
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(TransportResponse {
                status: 200,
                body: Some(serde_json::json!({ "received": true })),
            })
        })
    }
}
