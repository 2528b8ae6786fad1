// Poll-mode ingestion: search recent mentions on a fixed interval.
//
// Each cycle asks the recent-search endpoint for `@target` tweets created
// since the watermark (`last_check_time`), hands them to the mention handler
// in response order, and advances the watermark only after the whole cycle
// succeeded. A 429 with a reset time pushes the next cycle out past the
// reset instead of hammering the endpoint.
//
// Scheduling is one spawned task per start. Arming a new scheduler cancels
// the previous one, so there is never more than one pending cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::budget::{BudgetSnapshot, RequestBudget, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use super::{
    lock, ErrorHandler, Handlers, IngestionMode, IngestionSource, IngestionStatus, MentionHandler,
};
use crate::mention::MentionEvent;
use crate::twitter::error::rate_limit_reset;
use crate::twitter::traits::MentionSearch;
use crate::twitter::types::SearchQuery;

/// Endpoint polled each cycle, reported in status.
pub const SEARCH_ENDPOINT: &str = "/2/tweets/search/recent";

/// Default time between cycles.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Extra wait on top of a rate-limit reset time.
const RATE_LIMIT_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Account to watch, without the leading `@`.
    pub target_username: String,
    pub polling_interval: Duration,
    /// Page size for each search (10..=100).
    pub max_results: u32,
    pub max_requests_per_window: u32,
    pub rate_limit_window: Duration,
    /// Skip the credential check in `start()`.
    pub skip_connection_test: bool,
}

impl PollingConfig {
    pub fn new(target_username: impl Into<String>) -> Self {
        Self {
            target_username: target_username.into(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_results: 10,
            max_requests_per_window: DEFAULT_MAX_REQUESTS,
            rate_limit_window: DEFAULT_WINDOW,
            skip_connection_test: false,
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The source isn't running; nothing happened.
    Stopped,
    /// The request budget is exhausted; no request was made.
    Skipped,
    /// The search succeeded and `found` mentions were handed off.
    Completed { found: usize },
    /// The search failed; the error went to the error handler.
    Failed,
    /// The API rate-limited us; retry after `wait`.
    RateLimited { wait: Duration },
}

impl PollOutcome {
    /// Delay before the next cycle, or `None` to stop scheduling.
    pub fn next_delay(&self, interval: Duration) -> Option<Duration> {
        match self {
            PollOutcome::Stopped => None,
            PollOutcome::RateLimited { wait } => Some(*wait),
            _ => Some(interval),
        }
    }
}

/// Snapshot of the polling source for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PollStatus {
    pub is_running: bool,
    pub target_user: String,
    pub last_check_time: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub time_until_next_poll_ms: Option<u64>,
    pub polling_interval_ms: u64,
    pub requests: BudgetSnapshot,
    pub endpoint: &'static str,
}

struct PollState {
    running: bool,
    last_check_time: Option<DateTime<Utc>>,
    next_poll_at: Option<DateTime<Utc>>,
    polling_interval: Duration,
    budget: RequestBudget,
    scheduler: Option<CancellationToken>,
}

struct Shared {
    api: Arc<dyn MentionSearch>,
    config: PollingConfig,
    state: Mutex<PollState>,
    handlers: Handlers,
}

/// Interval-polling ingestion source.
pub struct PollingSource {
    shared: Arc<Shared>,
}

impl PollingSource {
    pub fn new(api: Arc<dyn MentionSearch>, config: PollingConfig) -> Self {
        let state = PollState {
            running: false,
            last_check_time: None,
            next_poll_at: None,
            polling_interval: config.polling_interval,
            budget: RequestBudget::new(config.max_requests_per_window, config.rate_limit_window),
            scheduler: None,
        };

        Self {
            shared: Arc::new(Shared {
                api,
                config,
                state: Mutex::new(state),
                handlers: Handlers::default(),
            }),
        }
    }

    /// Run one cycle now, outside the schedule.
    pub async fn poll(&self) -> PollOutcome {
        self.shared.poll().await
    }

    /// Zero the request counter and start a new budget window.
    pub fn reset_request_budget(&self) {
        lock(&self.shared.state).budget.reset(Utc::now());
        info!("Request budget reset");
    }

    /// Change the interval used by subsequent cycles.
    pub fn set_polling_interval(&self, interval: Duration) {
        lock(&self.shared.state).polling_interval = interval;
        info!(interval_ms = interval.as_millis() as u64, "Polling interval updated");
    }

    pub fn poll_status(&self) -> PollStatus {
        self.shared.status()
    }
}

impl Shared {
    fn interval(&self) -> Duration {
        lock(&self.state).polling_interval
    }

    async fn poll(&self) -> PollOutcome {
        let cycle_start = Utc::now();

        let start_time = {
            let mut state = lock(&self.state);
            if !state.running {
                return PollOutcome::Stopped;
            }
            if !state.budget.can_request() {
                warn!(
                    used = state.budget.used(),
                    max = self.config.max_requests_per_window,
                    "Request budget exhausted, skipping poll"
                );
                return PollOutcome::Skipped;
            }
            state.budget.record();
            state
                .last_check_time
                .unwrap_or_else(|| cycle_start - to_chrono(state.polling_interval))
        };

        let query = SearchQuery {
            query: format!("@{}", self.config.target_username),
            max_results: self.config.max_results,
            start_time,
        };
        debug!(query = %query.query, start_time = %start_time, "Searching for mentions");

        let result = self.api.search_mentions(&query).await;

        if !lock(&self.state).running {
            debug!("Polling stopped during search, discarding results");
            return PollOutcome::Stopped;
        }

        match result {
            Ok(page) => {
                let found = page.data.len();
                if found > 0 {
                    info!(found, "Found new mentions");
                } else {
                    debug!("No new mentions");
                }

                let includes = page.includes;
                for tweet in page.data {
                    let mention = MentionEvent::resolve(tweet, &includes);
                    self.handlers.emit_mention(mention).await;
                }

                let mut state = lock(&self.state);
                if !state.running {
                    debug!("Polling stopped during delivery, keeping watermark");
                    return PollOutcome::Stopped;
                }
                state.last_check_time = Some(match state.last_check_time {
                    Some(last) => last.max(cycle_start),
                    None => cycle_start,
                });
                PollOutcome::Completed { found }
            }
            Err(err) => match rate_limit_reset(&err) {
                Some(reset) => {
                    let wait = (reset - Utc::now() + to_chrono(RATE_LIMIT_GRACE))
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    warn!(
                        reset = %reset,
                        wait_secs = wait.as_secs(),
                        "Rate limited by search endpoint, delaying next poll"
                    );
                    PollOutcome::RateLimited { wait }
                }
                None => {
                    error!(error = %format!("{err:#}"), "Mention search failed");
                    self.handlers.emit_error(&err);
                    PollOutcome::Failed
                }
            },
        }
    }

    /// Replace any pending schedule with a new one firing after `first_delay`.
    /// Does nothing once the source has been stopped.
    fn arm(self: &Arc<Self>, first_delay: Duration) {
        let token = CancellationToken::new();
        let previous = {
            let mut state = lock(&self.state);
            if !state.running {
                debug!("Polling stopped, not scheduling");
                return;
            }
            state.next_poll_at = Utc::now().checked_add_signed(to_chrono(first_delay));
            state.scheduler.replace(token.clone())
        };
        if let Some(previous) = previous {
            previous.cancel();
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run_schedule(token, first_delay).await });
    }

    async fn run_schedule(self: Arc<Self>, token: CancellationToken, mut delay: Duration) {
        loop {
            {
                let mut state = lock(&self.state);
                if token.is_cancelled() {
                    break;
                }
                state.next_poll_at = Utc::now().checked_add_signed(to_chrono(delay));
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = self.poll().await;
            if token.is_cancelled() {
                break;
            }
            match outcome.next_delay(self.interval()) {
                Some(next) => delay = next,
                None => break,
            }
        }
        debug!("Poll scheduler exiting");
    }

    fn status(&self) -> PollStatus {
        let state = lock(&self.state);
        let now = Utc::now();
        PollStatus {
            is_running: state.running,
            target_user: self.config.target_username.clone(),
            last_check_time: state.last_check_time,
            next_poll_at: state.next_poll_at,
            time_until_next_poll_ms: state.next_poll_at.map(|at| {
                (at - now)
                    .to_std()
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0)
            }),
            polling_interval_ms: state.polling_interval.as_millis() as u64,
            requests: state.budget.snapshot(),
            endpoint: SEARCH_ENDPOINT,
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl IngestionSource for PollingSource {
    fn mode(&self) -> IngestionMode {
        IngestionMode::Polling
    }

    fn on_mention(&self, handler: MentionHandler) {
        self.shared.handlers.set_mention(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.shared.handlers.set_error(handler);
    }

    async fn start(&self) -> Result<()> {
        if lock(&self.shared.state).running {
            debug!("Polling already running");
            return Ok(());
        }

        if !self.shared.config.skip_connection_test {
            if let Err(err) = self.shared.api.check_connection().await {
                error!(error = %format!("{err:#}"), "Twitter API connection check failed");
                self.shared.handlers.emit_error(&err);
                return Err(err);
            }
        } else {
            debug!("Skipping startup connection check");
        }

        let interval = {
            let mut state = lock(&self.shared.state);
            if state.running {
                return Ok(());
            }
            let floor = Utc::now() - to_chrono(state.polling_interval);
            state.last_check_time = Some(match state.last_check_time {
                Some(last) => last.max(floor),
                None => floor,
            });
            state.running = true;
            state.polling_interval
        };

        info!(
            target_user = %self.shared.config.target_username,
            interval_secs = interval.as_secs(),
            "Polling started"
        );

        let outcome = self.shared.poll().await;
        if let Some(delay) = outcome.next_delay(self.shared.interval()) {
            self.shared.arm(delay);
        }
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            if !state.running && state.scheduler.is_none() {
                return;
            }
            state.running = false;
            state.next_poll_at = None;
            if let Some(token) = state.scheduler.take() {
                token.cancel();
            }
        }
        info!("Polling stopped");
    }

    fn status(&self) -> IngestionStatus {
        IngestionStatus::Polling(self.shared.status())
    }
}
