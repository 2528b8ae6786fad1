// Serde types for the Twitter API v2 endpoints the bot touches.
//
// Only the fields the ingestion sources need are modeled. Everything uses
// `#[serde(default)]` generously because the API omits empty collections
// (a search with no hits has no `data` key at all).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tweet fields requested on every search and stream connection.
pub const TWEET_FIELDS: &str = "id,text,created_at,author_id,public_metrics";

/// User fields requested for the side-loaded authors.
pub const USER_FIELDS: &str = "id,username,name";

/// Expansions requested so authors arrive in `includes.users`.
pub const EXPANSIONS: &str = "author_id";

/// A single tweet as returned in `data`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub public_metrics: Option<PublicMetrics>,
}

/// Engagement counters attached to a tweet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impression_count: Option<u64>,
}

/// A user object from `includes.users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
}

/// Side-loaded objects referenced by the tweets in `data`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
}

impl Includes {
    /// Find the side-loaded user with the given id.
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }
}

/// Response from `GET /2/tweets/search/recent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub data: Vec<Tweet>,
    #[serde(default)]
    pub includes: Includes,
    pub meta: Option<SearchMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub result_count: u32,
    pub newest_id: Option<String>,
    pub oldest_id: Option<String>,
    pub next_token: Option<String>,
}

/// Parameters for one recent-search query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Search expression, e.g. `@target`.
    pub query: String,
    /// Page size (the API accepts 10..=100).
    pub max_results: u32,
    /// Lower time bound: only tweets created at or after this instant.
    pub start_time: DateTime<Utc>,
}

/// An error object as it appears in `errors` arrays.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiProblem {
    pub title: Option<String>,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: Option<String>,
}

impl std::fmt::Display for ApiProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = self.title.as_deref().unwrap_or("error");
        match (&self.detail, &self.value) {
            (Some(detail), _) => write!(f, "{title}: {detail}"),
            (None, Some(value)) => write!(f, "{title} ({value})"),
            (None, None) => f.write_str(title),
        }
    }
}

// -- Filtered stream rules --

/// An active rule on the filtered stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamRule {
    pub id: String,
    pub value: String,
    pub tag: Option<String>,
}

/// A rule to add to the filtered stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRule {
    pub value: String,
    pub tag: String,
}

/// Response from `GET /2/tweets/search/stream/rules`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesResponse {
    #[serde(default)]
    pub data: Vec<StreamRule>,
}

/// Response from `POST /2/tweets/search/stream/rules` with an `add` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddRulesResponse {
    #[serde(default)]
    pub data: Vec<StreamRule>,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

/// One line of the filtered stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamPayload {
    pub data: Option<Tweet>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MatchingRule {
    pub id: String,
    pub tag: Option<String>,
}
