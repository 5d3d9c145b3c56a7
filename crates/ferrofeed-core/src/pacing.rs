//! Pacing: turns a quota snapshot into the wait before the next poll.

use std::time::Duration;

use tracing::debug;

use crate::fetch::FetchOutcome;
use crate::rate_limit::RateLimitSnapshot;
use crate::UtcDateTime;

/// Shortest wait between polls whenever the quota gives no better answer.
pub const MIN_DELAY: Duration = Duration::from_secs(1);
/// Fixed wait after an unexpected upstream status.
pub const UNEXPECTED_STATUS_WAIT: Duration = Duration::from_secs(10);

/// Spread the remaining calls evenly across the time left until reset.
///
/// - calls left and a future reset: `(reset_at - now) / remaining`
/// - no calls left: wait for the reset, at least [`MIN_DELAY`]
/// - otherwise (reset already passed): [`MIN_DELAY`]
pub fn next_delay(snapshot: &RateLimitSnapshot, now: UtcDateTime) -> Duration {
    let until_reset = snapshot.reset_at.seconds_since(now);

    if snapshot.remaining > 0 && until_reset > 0.0 {
        return Duration::from_secs_f64(until_reset / f64::from(snapshot.remaining));
    }

    if snapshot.remaining == 0 {
        return wait_for_reset(snapshot, now);
    }

    MIN_DELAY
}

/// Time left until the quota resets, at least [`MIN_DELAY`].
pub fn wait_for_reset(snapshot: &RateLimitSnapshot, now: UtcDateTime) -> Duration {
    let until_reset = snapshot.reset_at.seconds_since(now);
    if until_reset > MIN_DELAY.as_secs_f64() {
        Duration::from_secs_f64(until_reset)
    } else {
        MIN_DELAY
    }
}

/// Decides how long the polling loop sleeps after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub unexpected_status_wait: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            unexpected_status_wait: UNEXPECTED_STATUS_WAIT,
        }
    }
}

impl PacingPolicy {
    /// - throttled (401, 403, 429): [`wait_for_reset`], regardless of `remaining`
    /// - unexpected status: [`next_delay`], at least `unexpected_status_wait`
    /// - anything else: [`next_delay`]
    pub fn delay_after(
        &self,
        outcome: &FetchOutcome,
        snapshot: &RateLimitSnapshot,
        now: UtcDateTime,
    ) -> Duration {
        let delay = match outcome {
            FetchOutcome::Throttled { .. } => wait_for_reset(snapshot, now),
            FetchOutcome::Unexpected { .. } => {
                next_delay(snapshot, now).max(self.unexpected_status_wait)
            }
            _ => next_delay(snapshot, now),
        };

        debug!(
            outcome = ?outcome.kind(),
            remaining = snapshot.remaining,
            reset_at = %snapshot.reset_at,
            delay_secs = delay.as_secs_f64(),
            "paced next poll"
        );
        delay
    }
}
