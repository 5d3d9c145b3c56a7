//! The polling loop: fetch with retry, persist the validator token, store
//! events, pace, sleep, repeat.
//!
//! Nothing that happens upstream or in storage ends the loop. Storage runs on
//! the blocking pool, so a panicking sink surfaces as a failed cycle instead
//! of killing the task.

use std::sync::Arc;
use std::time::Duration;

use ferrofeed_warehouse::{IngestReport, Warehouse};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::FeedConfig;
use crate::fetch::{FeedClient, FetchOutcome, OutcomeKind};
use crate::pacing::PacingPolicy;
use crate::rate_limit::RateLimitSnapshot;
use crate::retry::{run_with_retry, RetryConfig};
use crate::sink::EventSink;
use crate::validator::ValidatorTokenFile;
use crate::{CoreError, Event, ReqwestHttpClient};

/// What happened to the events of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageStatus {
    /// No events to hand over.
    Skipped,
    Stored(IngestReport),
    /// The sink returned an error or panicked.
    Failed(String),
}

/// Summary of one polling iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcome: OutcomeKind,
    pub fetched: usize,
    pub storage: StorageStatus,
    /// Snapshot the delay was computed from.
    pub rate_limit: RateLimitSnapshot,
    pub delay: Duration,
}

pub struct Poller {
    feed: FeedClient,
    tokens: ValidatorTokenFile,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    pacing: PacingPolicy,
}

impl Poller {
    pub fn new(
        feed: FeedClient,
        tokens: ValidatorTokenFile,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            feed,
            tokens,
            sink,
            clock,
            retry: RetryConfig::default(),
            pacing: PacingPolicy::default(),
        }
    }

    /// Production wiring: reqwest transport, `DuckDB` storage, wall clock.
    pub fn from_config(config: &FeedConfig) -> Result<Self, CoreError> {
        let auth = config.auth()?;
        let warehouse = Warehouse::open(config.warehouse_config())?;
        let feed = FeedClient::new(
            Arc::new(ReqwestHttpClient::new()),
            config.feed_url.clone(),
            auth,
        )
        .with_timeout_ms(config.request_timeout_ms);

        Ok(Self::new(
            feed,
            ValidatorTokenFile::new(config.etag_path.clone()),
            Arc::new(warehouse),
            Arc::new(SystemClock),
        )
        .with_retry_config(config.retry))
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run one iteration without the trailing sleep.
    pub async fn poll_once(&self) -> CycleReport {
        let feed = &self.feed;
        let tokens = &self.tokens;
        let clock = self.clock.as_ref();

        // The token is re-read on every attempt; a retry sees whatever the
        // store holds at that moment.
        let outcome = run_with_retry(
            move || async move {
                let validator = tokens.load().await;
                feed.fetch(validator, clock.now()).await
            },
            &self.retry,
            clock,
        )
        .await;

        if let FetchOutcome::Success {
            validator: Some(token),
            ..
        } = &outcome
        {
            self.persist_validator(token).await;
        }

        let storage = self.store(outcome.events()).await;

        let now = self.clock.now();
        let rate_limit = outcome
            .rate_limit()
            .unwrap_or_else(|| RateLimitSnapshot::exhausted(now));
        let delay = self.pacing.delay_after(&outcome, &rate_limit, now);

        let report = CycleReport {
            outcome: outcome.kind(),
            fetched: outcome.events().len(),
            storage,
            rate_limit,
            delay,
        };
        info!(
            outcome = ?report.outcome,
            fetched = report.fetched,
            remaining = rate_limit.remaining,
            delay_secs = delay.as_secs_f64(),
            "poll cycle complete"
        );
        report
    }

    /// Poll forever. Only returns if the surrounding task is dropped.
    pub async fn run(self) {
        info!(feed_url = self.feed.feed_url(), "poller started");
        loop {
            let report = self.poll_once().await;
            self.clock.sleep(report.delay).await;
        }
    }

    /// Start the loop as a detached task on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn persist_validator(&self, token: &str) {
        match self.tokens.save(token).await {
            Ok(()) => debug!(path = %self.tokens.path().display(), "stored validator token"),
            Err(error) => warn!(
                path = %self.tokens.path().display(),
                %error,
                "failed to persist validator token"
            ),
        }
    }

    async fn store(&self, events: &[Event]) -> StorageStatus {
        if events.is_empty() {
            return StorageStatus::Skipped;
        }

        let sink = Arc::clone(&self.sink);
        let batch = events.to_vec();
        match tokio::task::spawn_blocking(move || sink.insert_events(&batch)).await {
            Ok(Ok(report)) => {
                info!(
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    skipped = report.skipped,
                    "stored events"
                );
                StorageStatus::Stored(report)
            }
            Ok(Err(error)) => {
                error!(%error, events = events.len(), "failed to store events");
                StorageStatus::Failed(error.to_string())
            }
            Err(join_error) => {
                error!(error = %join_error, events = events.len(), "storage task panicked");
                StorageStatus::Failed(format!("storage task failed: {join_error}"))
            }
        }
    }
}
