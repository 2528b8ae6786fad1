use std::env;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mentionwatch::config::Config;
use mentionwatch::engine::Engine;
use mentionwatch::ingest::IngestionMode;
use mentionwatch::webhook::WebhookSink;

/// mentionwatch: forward Twitter mentions of one account to a webhook.
#[derive(Parser)]
#[command(name = "mentionwatch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for mentions and forward each one to the webhook
    Run {
        /// Override MENTION_MODE (polling or streaming)
        #[arg(long)]
        mode: Option<IngestionMode>,
    },

    /// Send the test envelope to the webhook once
    TestWebhook,

    /// Validate configuration and exercise the webhook end to end
    Check {
        /// Also verify the bearer token with one search request
        #[arg(long)]
        twitter: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { mode } => {
            let mut config = Config::load()?;
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if config.is_development() {
                debug!(config = ?config, "Configuration loaded");
            }
            run(config).await?;
        }

        Commands::TestWebhook => {
            let config = Config::load()?;
            let sink = WebhookSink::http(config.webhook_config())?;
            let result = sink.send_test(&config.target_username).await;

            if result.success {
                println!(
                    "{} HTTP {} after {} attempt(s)",
                    "Test webhook delivered:".green().bold(),
                    result.status.unwrap_or_default(),
                    result.attempts
                );
            } else {
                println!(
                    "{} {}",
                    "Test webhook failed:".red().bold(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
                bail!("test webhook failed after {} attempt(s)", result.attempts);
            }
        }

        Commands::Check { twitter } => {
            mentionwatch::check::run_checks(twitter).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `LOG_LEVEL` for this crate. `LOG_FORMAT=json`
/// switches to one JSON object per line.
fn init_tracing() {
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("mentionwatch={level},tower_http={level}"))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: Config) -> Result<()> {
    let engine = Arc::new(Engine::from_config(&config)?);
    let shutdown = CancellationToken::new();

    #[cfg(feature = "health")]
    let server = if config.health_enabled {
        use mentionwatch::health::{self, AppInfo, HealthState};
        let state = HealthState::new(Arc::clone(&engine), AppInfo::from_config(&config));
        Some(tokio::spawn(health::run_server(
            state,
            config.port,
            shutdown.clone(),
        )))
    } else {
        None
    };
    #[cfg(not(feature = "health"))]
    let server: Option<tokio::task::JoinHandle<Result<()>>> = None;

    info!(
        target_user = %config.target_username,
        mode = %config.mode,
        "Starting mentionwatch"
    );
    if let Err(e) = engine.start().await {
        shutdown.cancel();
        return Err(e);
    }

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    engine.stop().await;
    shutdown.cancel();

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %format!("{e:#}"), "Health server exited with error"),
            Err(e) => warn!(error = %e, "Health server task failed"),
        }
    }

    info!("Goodbye");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
