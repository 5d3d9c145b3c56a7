//! Bounded retry with exponential backoff for transient fetch failures.
//!
//! Only [`FetchOutcome::ConnectionError`] and [`FetchOutcome::ServerError`]
//! are retried. Every other outcome ends the loop at once; throttling and
//! unexpected statuses are paced by the scheduler, not here.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::clock::Clock;
use crate::fetch::FetchOutcome;
use crate::rate_limit::RateLimitSnapshot;

/// Configuration for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts per polling cycle. Values below 1 are treated as 1.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Cap for the doubling delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    pub fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// The sleeps a fully failing cycle performs, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut state = BackoffState::new(self);
        (0..self.attempt_budget()).map(move |_| state.advance())
    }

    /// Upper bound on time spent sleeping inside one cycle.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

/// Per-cycle backoff bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    attempt_count: u32,
    current_delay: Duration,
    max_delay: Duration,
}

impl BackoffState {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt_count: 0,
            current_delay: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
        }
    }

    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub const fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Records a failed attempt and returns the delay to sleep before the
    /// next one; the following delay doubles, capped at `max_delay`.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current_delay;
        self.current_delay = self.current_delay.saturating_mul(2).min(self.max_delay);
        self.attempt_count = self.attempt_count.saturating_add(1);
        delay
    }
}

/// Run `fetch` until it yields a terminal outcome or the attempt budget is
/// spent. Exhaustion yields [`FetchOutcome::Exhausted`] with a zeroed
/// snapshot resetting one window after the final sleep.
pub async fn run_with_retry<F, Fut>(
    mut fetch: F,
    config: &RetryConfig,
    clock: &dyn Clock,
) -> FetchOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    let budget = config.attempt_budget();
    let mut backoff = BackoffState::new(config);

    loop {
        let outcome = fetch().await;
        if !outcome.is_retryable() {
            return outcome;
        }

        let delay = backoff.advance();
        warn!(
            outcome = ?outcome.kind(),
            attempt = backoff.attempt_count(),
            budget,
            delay_secs = delay.as_secs_f64(),
            "transient feed failure, backing off"
        );
        clock.sleep(delay).await;

        if backoff.attempt_count() >= budget {
            error!(
                attempts = backoff.attempt_count(),
                "max retries reached, giving up for this cycle"
            );
            return FetchOutcome::Exhausted {
                attempts: backoff.attempt_count(),
                rate_limit: RateLimitSnapshot::exhausted(clock.now()),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::UtcDateTime;

    fn clock() -> ManualClock {
        ManualClock::new(UtcDateTime::from_unix_timestamp(1_700_000_000).expect("ts"))
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    fn connection_error() -> FetchOutcome {
        FetchOutcome::ConnectionError {
            message: String::from("connection reset"),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut state = BackoffState::new(&RetryConfig::default());

        let delays: Vec<Duration> = (0..7).map(|_| state.advance()).collect();

        assert_eq!(delays, secs(&[2, 4, 8, 16, 32, 60, 60]));
        assert_eq!(state.attempt_count(), 7);
    }

    #[test]
    fn initial_delay_above_cap_is_clamped() {
        let config = RetryConfig::new(3, Duration::from_secs(90), Duration::from_secs(60));

        assert_eq!(config.delays().collect::<Vec<_>>(), secs(&[60, 60, 60]));
    }

    #[test]
    fn worst_case_wait_is_bounded() {
        let config = RetryConfig::default();

        assert_eq!(config.total_max_wait(), Duration::from_secs(2 + 4 + 8 + 16 + 32));
        assert!(config.total_max_wait() <= config.max_delay * config.max_retries);
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_retries_attempts() {
        let clock = clock();
        let config = RetryConfig::new(3, Duration::from_secs(2), Duration::from_secs(60));
        let mut attempts = 0;

        let outcome = run_with_retry(
            || {
                attempts += 1;
                async { connection_error() }
            },
            &config,
            &clock,
        )
        .await;

        assert_eq!(attempts, 3);
        assert_eq!(clock.sleeps(), secs(&[2, 4, 8]));
        let FetchOutcome::Exhausted {
            attempts: reported,
            rate_limit,
        } = outcome
        else {
            panic!("expected exhaustion, got {outcome:?}");
        };
        assert_eq!(reported, 3);
        assert_eq!(rate_limit.limit, 0);
        assert_eq!(rate_limit.remaining, 0);
        // now = start + 14s of backoff, reset one window later
        assert_eq!(rate_limit.reset_at.unix_timestamp(), 1_700_000_000 + 14 + 60);
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let clock = clock();
        let snapshot = RateLimitSnapshot::fallback(clock.now());
        let mut script = vec![
            FetchOutcome::ServerError { status: 502 },
            connection_error(),
            FetchOutcome::NotModified {
                rate_limit: snapshot,
            },
        ]
        .into_iter();

        let outcome = run_with_retry(
            || {
                let next = script.next().unwrap_or_else(connection_error);
                async move { next }
            },
            &RetryConfig::default(),
            &clock,
        )
        .await;

        assert_eq!(
            outcome,
            FetchOutcome::NotModified {
                rate_limit: snapshot
            }
        );
        assert_eq!(clock.sleeps(), secs(&[2, 4]));
    }

    #[tokio::test]
    async fn terminal_outcomes_are_not_retried() {
        let clock = clock();
        let snapshot = RateLimitSnapshot::new(60, 0, clock.now());
        let mut attempts = 0;

        let outcome = run_with_retry(
            || {
                attempts += 1;
                async move {
                    FetchOutcome::Throttled {
                        status: 429,
                        rate_limit: snapshot,
                    }
                }
            },
            &RetryConfig::default(),
            &clock,
        )
        .await;

        assert_eq!(attempts, 1);
        assert!(clock.sleeps().is_empty(), "throttling is paced, not slept here");
        assert!(matches!(outcome, FetchOutcome::Throttled { status: 429, .. }));
    }

    #[tokio::test]
    async fn zero_retry_budget_still_attempts_once() {
        let clock = clock();
        let config = RetryConfig::new(0, Duration::from_secs(2), Duration::from_secs(60));
        let mut attempts = 0;

        let outcome = run_with_retry(
            || {
                attempts += 1;
                async { connection_error() }
            },
            &config,
            &clock,
        )
        .await;

        assert_eq!(attempts, 1);
        assert!(matches!(outcome, FetchOutcome::Exhausted { attempts: 1, .. }));
    }
}
