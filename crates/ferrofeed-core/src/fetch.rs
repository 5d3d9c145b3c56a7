//! Conditional fetch client for the upstream event feed.
//!
//! One call performs exactly one `GET`, attaching the validator token as
//! `If-None-Match` when one is known, and classifies the response into a
//! [`FetchOutcome`]. The client never sleeps and never persists the token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use crate::rate_limit::RateLimitSnapshot;
use crate::{Event, EventKind, UtcDateTime, ValidationError};

pub const DEFAULT_FEED_URL: &str = "https://api.github.com/events";

const BODY_EXCERPT_CHARS: usize = 200;

/// Classified result of one fetch attempt (or of a whole retry cycle, for
/// [`FetchOutcome::Exhausted`]).
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 304: nothing new since the validator token was issued.
    NotModified { rate_limit: RateLimitSnapshot },
    /// 200: allow-listed events in feed order, plus the fresh validator token.
    Success {
        events: Vec<Event>,
        validator: Option<String>,
        rate_limit: RateLimitSnapshot,
    },
    /// 401, 403, 429: authentication or quota rejection.
    Throttled {
        status: u16,
        rate_limit: RateLimitSnapshot,
    },
    /// 5xx: transient upstream failure.
    ServerError { status: u16 },
    /// Any other status, or a 200 whose body is not an event array.
    Unexpected {
        status: u16,
        detail: String,
        rate_limit: RateLimitSnapshot,
    },
    /// DNS, connect, timeout, reset or body read failure.
    ConnectionError { message: String },
    /// Retry budget consumed without a terminal outcome.
    Exhausted {
        attempts: u32,
        rate_limit: RateLimitSnapshot,
    },
}

/// Discriminant of [`FetchOutcome`], for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    NotModified,
    Success,
    Throttled,
    ServerError,
    Unexpected,
    ConnectionError,
    Exhausted,
}

impl FetchOutcome {
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::NotModified { .. } => OutcomeKind::NotModified,
            Self::Success { .. } => OutcomeKind::Success,
            Self::Throttled { .. } => OutcomeKind::Throttled,
            Self::ServerError { .. } => OutcomeKind::ServerError,
            Self::Unexpected { .. } => OutcomeKind::Unexpected,
            Self::ConnectionError { .. } => OutcomeKind::ConnectionError,
            Self::Exhausted { .. } => OutcomeKind::Exhausted,
        }
    }

    /// Transient failures worth another attempt within the same cycle.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::ConnectionError { .. }
        )
    }

    /// Quota snapshot carried by the outcome, if the response produced one.
    pub fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        match self {
            Self::NotModified { rate_limit }
            | Self::Success { rate_limit, .. }
            | Self::Throttled { rate_limit, .. }
            | Self::Unexpected { rate_limit, .. }
            | Self::Exhausted { rate_limit, .. } => Some(*rate_limit),
            Self::ServerError { .. } | Self::ConnectionError { .. } => None,
        }
    }

    pub fn events(&self) -> &[Event] {
        match self {
            Self::Success { events, .. } => events,
            _ => &[],
        }
    }
}

/// Fetches the event feed with conditional requests.
#[derive(Clone)]
pub struct FeedClient {
    http_client: Arc<dyn HttpClient>,
    feed_url: String,
    auth: HttpAuth,
    timeout_ms: u64,
}

impl FeedClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        feed_url: impl Into<String>,
        auth: HttpAuth,
    ) -> Self {
        Self {
            http_client,
            feed_url: feed_url.into(),
            auth,
            timeout_ms: 10_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    pub async fn fetch(&self, validator: Option<String>, now: UtcDateTime) -> FetchOutcome {
        let mut request = HttpRequest::get(&self.feed_url)
            .with_auth(&self.auth)
            .with_header("accept", "application/vnd.github+json")
            .with_timeout_ms(self.timeout_ms);
        if let Some(token) = validator.as_deref() {
            request = request.with_header("if-none-match", token);
        }

        match self.http_client.execute(request).await {
            Ok(response) => classify(response, now),
            Err(error) => {
                warn!(error = %error, "feed request failed at the transport level");
                FetchOutcome::ConnectionError {
                    message: error.message().to_owned(),
                }
            }
        }
    }
}

/// Map one HTTP response onto a [`FetchOutcome`].
pub fn classify(response: HttpResponse, now: UtcDateTime) -> FetchOutcome {
    let status = response.status;
    match status {
        304 => {
            let rate_limit = RateLimitSnapshot::from_headers(&response.headers, now);
            info!(remaining = rate_limit.remaining, "no new events (HTTP 304)");
            FetchOutcome::NotModified { rate_limit }
        }
        200 => {
            let rate_limit = RateLimitSnapshot::from_headers(&response.headers, now);
            match parse_events(&response.body) {
                Some(events) => {
                    let validator = response
                        .header("etag")
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_owned);
                    info!(
                        events = events.len(),
                        remaining = rate_limit.remaining,
                        "fetched feed page"
                    );
                    FetchOutcome::Success {
                        events,
                        validator,
                        rate_limit,
                    }
                }
                None => {
                    warn!("feed body is not a JSON array of events");
                    FetchOutcome::Unexpected {
                        status,
                        detail: excerpt(&response.body),
                        rate_limit,
                    }
                }
            }
        }
        401 | 403 | 429 => {
            let rate_limit = RateLimitSnapshot::from_headers(&response.headers, now);
            warn!(
                status,
                remaining = rate_limit.remaining,
                reset_at = %rate_limit.reset_at,
                "rate limited or auth error"
            );
            FetchOutcome::Throttled { status, rate_limit }
        }
        500..=599 => {
            warn!(status, "upstream server error");
            FetchOutcome::ServerError { status }
        }
        _ => {
            let rate_limit = RateLimitSnapshot::from_headers(&response.headers, now);
            let detail = excerpt(&response.body);
            warn!(status, %detail, "unexpected feed status");
            FetchOutcome::Unexpected {
                status,
                detail,
                rate_limit,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    repo: Option<RawRepo>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    #[serde(default)]
    name: Option<String>,
}

/// Keep allow-listed events in feed order. Returns `None` when the body is not
/// a JSON array; individual malformed records are logged and skipped.
pub fn parse_events(body: &str) -> Option<Vec<Event>> {
    let Ok(Value::Array(records)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    let mut events = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let raw = match serde_json::from_value::<RawEvent>(record) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(index, %error, "skipping malformed feed record");
                continue;
            }
        };

        let Ok(kind) = EventKind::parse(&raw.kind) else {
            debug!(event_id = %raw.id, kind = %raw.kind, "ignoring untracked event type");
            continue;
        };

        match project(raw, kind) {
            Ok(event) => events.push(event),
            Err(error) => warn!(index, %error, "skipping malformed feed record"),
        }
    }

    Some(events)
}

fn project(raw: RawEvent, kind: EventKind) -> Result<Event, ValidationError> {
    let created_at = UtcDateTime::parse(&raw.created_at)?;
    let repo_name = raw.repo.and_then(|repo| repo.name);
    Event::new(raw.id, kind, repo_name, created_at)
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}
