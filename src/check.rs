// Manual end-to-end check: config, webhook reachability, optional API auth.
//
// Meant to be run by a human before deploying. Sends one test envelope and
// one simulated mention to the configured webhook so the receiving side can
// be eyeballed.

use std::env;

use anyhow::{bail, Result};
use chrono::Utc;
use colored::Colorize;

use crate::config::Config;
use crate::mention::{Author, MentionEvent};
use crate::twitter::client::TwitterClient;
use crate::twitter::traits::MentionSearch;
use crate::twitter::types::PublicMetrics;
use crate::webhook::{MentionEnvelope, WebhookSink};

/// Run every check in order, stopping at the first failure.
pub async fn run_checks(check_twitter: bool) -> Result<()> {
    println!("{}", "=== mentionwatch checks ===".bold());

    let result = run(check_twitter).await;
    match &result {
        Ok(()) => {
            println!("\n{}", "All checks passed.".green().bold());
            println!("Next steps:");
            println!("  1. Look at your webhook receiver for the two test deliveries");
            println!("  2. Start the bot with `mentionwatch run`");
            println!("  3. Mention the target account from another account");
        }
        Err(e) => {
            println!("\n{} {e:#}", "Check failed:".red().bold());
            println!("To fix this:");
            println!("  1. Make sure your .env file is configured");
            println!("  2. Check that TWITTER_BEARER_TOKEN is valid");
            println!("  3. Verify WEBHOOK_URL points at your receiver");
            println!("  4. Set TWITTER_TARGET_USERNAME without the @");
        }
    }
    result
}

async fn run(check_twitter: bool) -> Result<()> {
    step("Configuration");
    let config = match Config::from_lookup(|key| env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            for problem in &e.problems {
                println!("    {} {problem}", "x".red());
            }
            bail!("configuration is invalid");
        }
    };
    pass(&format!(
        "configuration is valid (target @{}, {} mode)",
        config.target_username, config.mode
    ));

    if check_twitter {
        step("Twitter API connection");
        let client = TwitterClient::new(&config.api_base_url, &config.bearer_token)?;
        client.check_connection().await?;
        pass("bearer token accepted");
    }

    step("Webhook URL");
    let sink = WebhookSink::http(config.webhook_config())?;
    let info = sink.info();
    println!("    url: {}", info.url);
    println!("    timeout: {} ms, retries: {}", info.timeout_ms, info.max_retries);
    if !info.is_valid {
        bail!("webhook URL is not a valid http(s) URL");
    }
    pass("webhook URL is valid");

    step("Test webhook");
    let result = sink.send_test(&config.target_username).await;
    if !result.success {
        bail!(
            "test webhook failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    pass(&format!("delivered (HTTP {})", status_label(result.status)));

    step("Simulated mention");
    let mention = simulated_mention(&config.target_username);
    let envelope = MentionEnvelope::new(&mention, &config.target_username, config.mode);
    let result = sink.send_envelope(&envelope).await;
    if !result.success {
        bail!(
            "simulated mention failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    pass(&format!("delivered (HTTP {})", status_label(result.status)));

    Ok(())
}

fn simulated_mention(target_user: &str) -> MentionEvent {
    MentionEvent {
        id: "1234567890123456789".to_string(),
        text: format!("Hey @{target_user}, this is a test mention from mentionwatch check"),
        created_at: Some(Utc::now()),
        author_id: Some("987654321".to_string()),
        author: Some(Author {
            id: "987654321".to_string(),
            username: "test_user".to_string(),
            name: "Test User".to_string(),
        }),
        metrics: Some(PublicMetrics {
            like_count: 1,
            ..Default::default()
        }),
    }
}

fn status_label(status: Option<u16>) -> String {
    status.map_or_else(|| "?".to_string(), |s| s.to_string())
}

fn step(name: &str) {
    println!("\n{} {}", "->".cyan(), name.bold());
}

fn pass(message: &str) {
    println!("    {} {message}", "ok".green());
}
