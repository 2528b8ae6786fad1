// Normalized mention: a tweet joined with its side-loaded author.

use chrono::{DateTime, Utc};

use crate::twitter::types::{Includes, PublicMetrics, Tweet, User};

/// Who wrote the mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub name: String,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
        }
    }
}

/// A detected mention, handed once to the mention handler.
#[derive(Debug, Clone, PartialEq)]
pub struct MentionEvent {
    pub id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
    /// `None` when the author wasn't in the response's includes.
    pub author: Option<Author>,
    pub metrics: Option<PublicMetrics>,
}

impl MentionEvent {
    /// Join a raw tweet with its author from `includes.users`.
    pub fn resolve(tweet: Tweet, includes: &Includes) -> Self {
        let author = tweet
            .author_id
            .as_deref()
            .and_then(|id| includes.user(id))
            .map(Author::from);

        Self {
            id: tweet.id,
            text: tweet.text,
            created_at: tweet.created_at,
            author_id: tweet.author_id,
            author,
            metrics: tweet.public_metrics,
        }
    }

    /// Public link to the tweet.
    pub fn url(&self) -> String {
        match &self.author {
            Some(author) => format!("https://twitter.com/{}/status/{}", author.username, self.id),
            None => format!("https://twitter.com/i/web/status/{}", self.id),
        }
    }
}
