// Twitter API client against a local mock server: query shape, error
// typing, rule management and stream decoding.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use httpmock::prelude::*;
use serde_json::json;

use mentionwatch::twitter::client::TwitterClient;
use mentionwatch::twitter::error::{rate_limit_reset, ApiError};
use mentionwatch::twitter::stream::StreamEvent;
use mentionwatch::twitter::traits::FilteredStream;
use mentionwatch::twitter::types::{NewRule, SearchQuery};

fn query() -> SearchQuery {
    SearchQuery {
        query: "@bot".to_string(),
        max_results: 25,
        start_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn search_sends_bearer_and_expected_params() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/2/tweets/search/recent")
                .header("authorization", "Bearer token-123")
                .query_param("query", "@bot")
                .query_param("max_results", "25")
                .query_param("expansions", "author_id")
                .query_param("tweet.fields", "id,text,created_at,author_id,public_metrics")
                .query_param("user.fields", "id,username,name")
                .query_param("start_time", "2024-05-01T12:00:00.000Z");
            then.status(200).json_body(json!({
                "data": [
                    {
                        "id": "1",
                        "text": "@bot hello",
                        "author_id": "9",
                        "created_at": "2024-05-01T12:01:00.000Z",
                        "public_metrics": {"retweet_count": 1, "reply_count": 0, "like_count": 3, "quote_count": 0}
                    }
                ],
                "includes": {"users": [{"id": "9", "username": "alice", "name": "Alice"}]},
                "meta": {"result_count": 1, "newest_id": "1", "oldest_id": "1"}
            }));
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "token-123").unwrap();
    let page = client.search_recent(&query()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].public_metrics.as_ref().unwrap().like_count, 3);
    assert_eq!(page.includes.user("9").unwrap().username, "alice");
    assert_eq!(page.meta.unwrap().result_count, 1);
}

#[tokio::test]
async fn empty_search_has_no_data_key() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/2/tweets/search/recent");
            then.status(200).json_body(json!({ "meta": { "result_count": 0 } }));
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();
    let page = client.search_recent(&query()).await.unwrap();
    assert!(page.data.is_empty());
    assert!(page.includes.users.is_empty());
}

#[tokio::test]
async fn rate_limit_carries_reset_time() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/2/tweets/search/recent");
            then.status(429)
                .header("x-rate-limit-limit", "450")
                .header("x-rate-limit-remaining", "0")
                .header("x-rate-limit-reset", "1714565000")
                .json_body(json!({ "title": "Too Many Requests" }));
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();
    let err = client.search_recent(&query()).await.unwrap_err();

    assert_eq!(rate_limit_reset(&err).unwrap().timestamp(), 1_714_565_000);
}

#[tokio::test]
async fn other_failures_are_status_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/2/tweets/search/recent");
            then.status(401).body("Unauthorized");
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "bad").unwrap();
    let err = client.search_recent(&query()).await.unwrap_err();

    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Status { status, body, .. }) => {
            assert_eq!(*status, 401);
            assert_eq!(body, "Unauthorized");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(rate_limit_reset(&err).is_none());
}

#[tokio::test]
async fn manages_stream_rules() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/2/tweets/search/stream/rules");
            then.status(200).json_body(json!({
                "data": [{"id": "100", "value": "@bot", "tag": "mentions"}],
                "meta": {"result_count": 1}
            }));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/tweets/search/stream/rules")
                .json_body(json!({ "delete": { "ids": ["100"] } }));
            then.status(200).json_body(json!({ "meta": { "summary": { "deleted": 1 } } }));
        })
        .await;
    let add = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/tweets/search/stream/rules")
                .json_body(json!({ "add": [{ "value": "@bot", "tag": "mentions" }] }));
            then.status(201).json_body(json!({
                "data": [{"id": "101", "value": "@bot", "tag": "mentions"}],
                "meta": {"summary": {"created": 1}}
            }));
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();

    let rules = client.list_rules().await.unwrap();
    assert_eq!(rules[0].id, "100");

    client.delete_rules(&["100".to_string()]).await.unwrap();

    let added = client
        .add_rule(&NewRule {
            value: "@bot".to_string(),
            tag: "mentions".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(added.data[0].id, "101");
    assert!(added.errors.is_empty());

    list.assert_async().await;
    delete.assert_async().await;
    add.assert_async().await;
}

#[tokio::test]
async fn deleting_nothing_skips_the_request() {
    let server = MockServer::start_async().await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST).path("/2/tweets/search/stream/rules");
            then.status(200).json_body(json!({}));
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();
    client.delete_rules(&[]).await.unwrap();

    assert_eq!(delete.hits_async().await, 0);
}

#[tokio::test]
async fn stream_body_is_decoded_into_events() {
    let server = MockServer::start_async().await;
    let line = json!({
        "data": {"id": "5", "text": "@bot streamed", "author_id": "9"},
        "includes": {"users": [{"id": "9", "username": "alice", "name": "Alice"}]},
        "matching_rules": [{"id": "101", "tag": "mentions"}]
    });
    let body = format!("{line}\r\n\r\n");
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/2/tweets/search/stream")
                .query_param("expansions", "author_id");
            then.status(200).body(body.as_str());
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();
    let events: Vec<StreamEvent> = client
        .connect(Duration::from_secs(20))
        .await
        .unwrap()
        .collect()
        .await;

    assert!(matches!(events[0], StreamEvent::Connected));
    match &events[1] {
        StreamEvent::Data(payload) => assert_eq!(payload.data.as_ref().unwrap().id, "5"),
        other => panic!("expected data, got {other:?}"),
    }
    assert!(matches!(events[2], StreamEvent::KeepAlive));
    assert!(matches!(events[3], StreamEvent::ConnectionClosed));
}

#[tokio::test]
async fn stream_rejection_fails_connect() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/2/tweets/search/stream");
            then.status(429).header("x-rate-limit-reset", "1714565000");
        })
        .await;

    let client = TwitterClient::new(&server.base_url(), "t").unwrap();
    let err = match client.connect(Duration::from_secs(20)).await {
        Ok(_) => panic!("expected connect to fail"),
        Err(err) => err,
    };
    assert!(rate_limit_reset(&err).is_some());
}
