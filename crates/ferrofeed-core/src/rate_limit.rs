//! Quota header parsing.
//!
//! Every upstream response carries `x-ratelimit-limit`, `x-ratelimit-remaining`
//! and `x-ratelimit-reset` (epoch seconds). Each field falls back to its own
//! default when absent or malformed, so parsing never fails.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::UtcDateTime;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub const DEFAULT_LIMIT: u32 = 60;
pub const DEFAULT_REMAINING: u32 = 1;
/// Reset horizon assumed when the upstream does not say.
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Point-in-time view of the call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: UtcDateTime,
}

impl RateLimitSnapshot {
    pub const fn new(limit: u32, remaining: u32, reset_at: UtcDateTime) -> Self {
        Self {
            limit,
            remaining,
            reset_at,
        }
    }

    /// Snapshot assumed when the response said nothing about the quota.
    pub fn fallback(now: UtcDateTime) -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_REMAINING, now + DEFAULT_RESET_WINDOW)
    }

    /// "Nothing learned this cycle": no budget, reset one window from now.
    pub fn exhausted(now: UtcDateTime) -> Self {
        Self::new(0, 0, now + DEFAULT_RESET_WINDOW)
    }

    /// Parse quota headers. Header names must already be lowercased.
    pub fn from_headers(headers: &BTreeMap<String, String>, now: UtcDateTime) -> Self {
        let limit = parse_count(headers.get(LIMIT_HEADER)).unwrap_or(DEFAULT_LIMIT);
        let remaining = parse_count(headers.get(REMAINING_HEADER)).unwrap_or(DEFAULT_REMAINING);
        let reset_at = headers
            .get(RESET_HEADER)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(|seconds| UtcDateTime::from_unix_timestamp(seconds).ok())
            .unwrap_or(now + DEFAULT_RESET_WINDOW);

        Self::new(limit, remaining, reset_at)
    }
}

fn parse_count(value: Option<&String>) -> Option<u32> {
    value.and_then(|value| value.trim().parse::<u32>().ok())
}
