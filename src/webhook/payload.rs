// JSON envelopes posted to the webhook.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::ingest::IngestionMode;
use crate::mention::MentionEvent;
use crate::twitter::types::PublicMetrics;

/// `event` value for mention deliveries.
pub const MENTION_EVENT: &str = "twitter_mention";

/// `event` value for test deliveries.
pub const TEST_EVENT: &str = "test";

/// Sent as `X-Bot-Name` and used in the user agent.
pub const BOT_NAME: &str = "mentionwatch";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionEnvelope {
    pub event: &'static str,
    pub timestamp: String,
    pub tweet: TweetBody,
    pub bot_info: MentionBotInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TweetBody {
    pub id: String,
    pub text: String,
    pub author: AuthorBody,
    pub created_at: Option<String>,
    pub public_metrics: Option<PublicMetrics>,
    pub url: String,
}

/// Author fields are null when the author couldn't be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorBody {
    pub id: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionBotInfo {
    pub target_user: String,
    pub processed_at: String,
    pub mode: IngestionMode,
}

impl MentionEnvelope {
    pub fn new(mention: &MentionEvent, target_user: &str, mode: IngestionMode) -> Self {
        let now = format_timestamp(Utc::now());
        let author = match &mention.author {
            Some(author) => AuthorBody {
                id: Some(author.id.clone()),
                username: Some(author.username.clone()),
                name: Some(author.name.clone()),
            },
            None => AuthorBody {
                id: mention.author_id.clone(),
                username: None,
                name: None,
            },
        };

        Self {
            event: MENTION_EVENT,
            timestamp: now.clone(),
            tweet: TweetBody {
                id: mention.id.clone(),
                text: mention.text.clone(),
                author,
                created_at: mention.created_at.map(format_timestamp),
                public_metrics: mention.metrics.clone(),
                url: mention.url(),
            },
            bot_info: MentionBotInfo {
                target_user: target_user.to_string(),
                processed_at: now,
                mode,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestEnvelope {
    pub event: &'static str,
    pub timestamp: String,
    pub message: String,
    pub bot_info: TestBotInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestBotInfo {
    pub version: &'static str,
    pub target_user: String,
    pub status: &'static str,
}

impl TestEnvelope {
    pub fn new(target_user: &str) -> Self {
        Self {
            event: TEST_EVENT,
            timestamp: format_timestamp(Utc::now()),
            message: format!("{BOT_NAME} test webhook"),
            bot_info: TestBotInfo {
                version: VERSION,
                target_user: target_user.to_string(),
                status: "testing",
            },
        }
    }
}
