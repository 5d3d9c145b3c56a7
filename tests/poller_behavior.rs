//! Behavior-driven tests for the polling loop
//!
//! These tests drive whole polling cycles offline: a scripted transport stands
//! in for the upstream feed and a manual clock records every sleep, so pacing,
//! retry and token handling can be asserted exactly.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ferrofeed_core::{
    Clock, Event, EventSink, FeedClient, HttpAuth, HttpError, HttpResponse, ManualClock,
    OutcomeKind, Poller, RateLimitSnapshot, ScriptedHttpClient, StorageStatus, UtcDateTime,
    ValidatorTokenFile,
};
use ferrofeed_warehouse::{IngestReport, Warehouse, WarehouseConfig, WarehouseError};
use tempfile::{tempdir, TempDir};

const START: i64 = 1_700_000_000;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<Event>>>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<Vec<Event>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn insert_events(&self, events: &[Event]) -> Result<IngestReport, WarehouseError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(events.to_vec());
        Ok(IngestReport {
            inserted: events.len(),
            ..IngestReport::default()
        })
    }
}

struct FailingSink;

impl EventSink for FailingSink {
    fn insert_events(&self, _events: &[Event]) -> Result<IngestReport, WarehouseError> {
        Err(WarehouseError::Rejected(String::from("disk full")))
    }
}

struct PanickingSink;

impl EventSink for PanickingSink {
    fn insert_events(&self, _events: &[Event]) -> Result<IngestReport, WarehouseError> {
        panic!("sink exploded");
    }
}

/// Manual clock that also yields to the runtime on every sleep, so a spawned
/// loop lets the test task run between cycles.
struct YieldingClock {
    inner: ManualClock,
}

impl Clock for YieldingClock {
    fn now(&self) -> UtcDateTime {
        self.inner.now()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.inner.sleep(duration).await;
            tokio::task::yield_now().await;
        })
    }
}

struct Harness {
    _temp: TempDir,
    http: Arc<ScriptedHttpClient>,
    clock: Arc<ManualClock>,
    tokens: ValidatorTokenFile,
}

impl Harness {
    fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
        let temp = tempdir().expect("tempdir");
        let tokens = ValidatorTokenFile::new(temp.path().join("github_etag.txt"));
        Self {
            _temp: temp,
            http: Arc::new(ScriptedHttpClient::new(responses)),
            clock: Arc::new(ManualClock::new(at(0))),
            tokens,
        }
    }

    fn poller(&self, sink: Arc<dyn EventSink>) -> Poller {
        let feed = FeedClient::new(
            self.http.clone(),
            "https://api.github.test/events",
            HttpAuth::Token(String::from("ghp_test")),
        );
        Poller::new(feed, self.tokens.clone(), sink, self.clock.clone())
    }

    fn sent_validators(&self) -> Vec<Option<String>> {
        self.http
            .requests()
            .iter()
            .map(|request| request.header("if-none-match").map(str::to_owned))
            .collect()
    }
}

fn at(offset_secs: i64) -> UtcDateTime {
    UtcDateTime::from_unix_timestamp(START + offset_secs).expect("ts")
}

fn raw_event(id: &str, kind: &str, repo: &str) -> String {
    format!(
        r#"{{"id":"{id}","type":"{kind}","actor":{{"login":"dev"}},"repo":{{"id":1,"name":"{repo}"}},"payload":{{}},"public":true,"created_at":"2024-03-01T12:00:00Z"}}"#
    )
}

fn feed_page(records: &[String], remaining: u32, reset_offset: i64) -> HttpResponse {
    HttpResponse::ok_json(format!("[{}]", records.join(",")))
        .with_header("X-RateLimit-Remaining", remaining.to_string())
        .with_header("X-RateLimit-Reset", (START + reset_offset).to_string())
}

fn five_event_page() -> HttpResponse {
    feed_page(
        &[
            raw_event("1", "PushEvent", "o/push"),
            raw_event("2", "WatchEvent", "o/watch"),
            raw_event("3", "PullRequestEvent", "o/pr"),
            raw_event("4", "CreateEvent", "o/create"),
            raw_event("5", "IssuesEvent", "o/issues"),
        ],
        8,
        80,
    )
}

fn not_modified(remaining: u32) -> HttpResponse {
    HttpResponse::new(304, "")
        .with_header("X-RateLimit-Limit", "5000")
        .with_header("X-RateLimit-Remaining", remaining.to_string())
        .with_header("X-RateLimit-Reset", (START + 3_600).to_string())
}

// =============================================================================
// Success path
// =============================================================================

#[tokio::test]
async fn when_the_feed_returns_a_page_allowed_events_are_stored_and_pacing_spreads_the_quota() {
    // Given: A page of five events, three of tracked types, with 8 calls left
    // for the next 80 seconds
    let harness = Harness::new(vec![Ok(five_event_page().with_header("ETag", "W/\"page-1\""))]);
    let sink = Arc::new(RecordingSink::default());
    let poller = harness.poller(sink.clone());

    // When: One cycle runs
    let report = poller.poll_once().await;

    // Then: Only tracked events reach storage, in feed order
    assert_eq!(report.outcome, OutcomeKind::Success);
    assert_eq!(report.fetched, 3);
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let ids: Vec<&str> = batches[0].iter().map(|event| event.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3", "5"]);
    assert_eq!(batches[0][1].repo_name.as_deref(), Some("o/pr"));
    assert_eq!(
        report.storage,
        StorageStatus::Stored(IngestReport {
            inserted: 3,
            duplicates: 0,
            skipped: 0,
        })
    );

    // Then: The snapshot defaults the missing limit and the delay is 80s / 8
    assert_eq!(report.rate_limit, RateLimitSnapshot::new(60, 8, at(80)));
    assert_eq!(report.delay, Duration::from_secs(10));

    // Then: The first request was unconditional and the new token was saved
    assert_eq!(harness.sent_validators(), vec![None]);
    assert_eq!(harness.tokens.load().await.as_deref(), Some("W/\"page-1\""));
    assert!(harness.clock.sleeps().is_empty());
}

#[tokio::test]
async fn when_a_token_was_saved_the_next_cycle_sends_it_and_a_304_stores_nothing() {
    // Given: A first page carrying a validator, then an unchanged feed
    let harness = Harness::new(vec![
        Ok(five_event_page().with_header("ETag", "\"v1\"")),
        Ok(not_modified(4_000)),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let poller = harness.poller(sink.clone());

    // When: Two cycles run
    let first = poller.poll_once().await;
    let second = poller.poll_once().await;

    // Then: The second request is conditional on the saved token
    assert_eq!(first.outcome, OutcomeKind::Success);
    assert_eq!(
        harness.sent_validators(),
        vec![None, Some(String::from("\"v1\""))]
    );

    // Then: Nothing new is stored and pacing follows the large quota
    assert_eq!(second.outcome, OutcomeKind::NotModified);
    assert_eq!(second.fetched, 0);
    assert_eq!(second.storage, StorageStatus::Skipped);
    assert_eq!(sink.batches().len(), 1);
    assert_eq!(second.rate_limit.limit, 5_000);
    assert_eq!(second.delay, Duration::from_secs_f64(3_600.0 / 4_000.0));
}

#[tokio::test]
async fn when_the_feed_has_no_etag_the_stored_token_is_kept() {
    let harness = Harness::new(vec![Ok(five_event_page())]);
    harness.tokens.save("\"old\"").await.expect("seed token");
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    let report = poller.poll_once().await;

    assert_eq!(report.outcome, OutcomeKind::Success);
    assert_eq!(harness.sent_validators(), vec![Some(String::from("\"old\""))]);
    assert_eq!(harness.tokens.load().await.as_deref(), Some("\"old\""));
}

// =============================================================================
// Transient failures and retry
// =============================================================================

#[tokio::test]
async fn when_a_server_error_is_followed_by_success_the_cycle_recovers_after_one_backoff() {
    // Given: A saved token, a 502, then a good page
    let harness = Harness::new(vec![
        Ok(HttpResponse::new(502, "bad gateway")),
        Ok(five_event_page().with_header("ETag", "\"v2\"")),
    ]);
    harness.tokens.save("\"v1\"").await.expect("seed token");
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    // When: One cycle runs
    let report = poller.poll_once().await;

    // Then: Both attempts carried the token read at attempt time
    assert_eq!(report.outcome, OutcomeKind::Success);
    assert_eq!(
        harness.sent_validators(),
        vec![Some(String::from("\"v1\"")), Some(String::from("\"v1\""))]
    );
    assert_eq!(harness.clock.sleeps(), vec![Duration::from_secs(2)]);
    assert_eq!(harness.tokens.load().await.as_deref(), Some("\"v2\""));

    // Then: The pacing delay is measured from after the backoff sleep
    assert_eq!(report.delay, Duration::from_secs_f64(78.0 / 8.0));
}

#[tokio::test]
async fn when_every_attempt_fails_the_cycle_is_exhausted_and_waits_one_window() {
    // Given: An upstream that never answers
    let harness = Harness::new(Vec::new());
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    // When: One cycle runs
    let report = poller.poll_once().await;

    // Then: Five attempts, backing off 2, 4, 8, 16, 32 seconds
    assert_eq!(report.outcome, OutcomeKind::Exhausted);
    assert_eq!(harness.http.requests().len(), 5);
    assert_eq!(
        harness.clock.sleeps(),
        [2, 4, 8, 16, 32].map(Duration::from_secs).to_vec()
    );

    // Then: The zeroed snapshot makes pacing wait for the assumed reset
    assert_eq!(report.rate_limit.remaining, 0);
    assert_eq!(report.rate_limit.limit, 0);
    assert_eq!(report.delay, Duration::from_secs(60));
    assert_eq!(report.storage, StorageStatus::Skipped);
}

// =============================================================================
// Throttling and unexpected responses
// =============================================================================

#[tokio::test]
async fn when_the_quota_is_spent_the_loop_waits_for_the_reset_without_retrying() {
    // Given: A 403 with no calls left until 30 seconds from now
    let harness = Harness::new(vec![Ok(HttpResponse::new(403, "rate limited")
        .with_header("X-RateLimit-Remaining", "0")
        .with_header("X-RateLimit-Reset", (START + 30).to_string()))]);
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    // When: One cycle runs
    let report = poller.poll_once().await;

    // Then: One request, no backoff, and the delay covers the reset
    assert_eq!(report.outcome, OutcomeKind::Throttled);
    assert_eq!(harness.http.requests().len(), 1);
    assert!(harness.clock.sleeps().is_empty());
    assert_eq!(report.delay, Duration::from_secs(30));
}

#[tokio::test]
async fn when_a_rejection_still_reports_calls_left_the_loop_waits_for_the_reset() {
    // Given: A 403 (secondary limit or bad credentials) with 4000 calls
    // reported left and the reset an hour away
    let harness = Harness::new(vec![Ok(HttpResponse::new(403, "forbidden")
        .with_header("X-RateLimit-Remaining", "4000")
        .with_header("X-RateLimit-Reset", (START + 3_600).to_string()))]);
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    // When: One cycle runs
    let report = poller.poll_once().await;

    // Then: The next poll waits for the reset instead of spreading the calls
    assert_eq!(report.outcome, OutcomeKind::Throttled);
    assert_eq!(report.rate_limit.remaining, 4_000);
    assert_eq!(harness.http.requests().len(), 1);
    assert!(harness.clock.sleeps().is_empty());
    assert_eq!(report.delay, Duration::from_secs(3_600));
}

#[tokio::test]
async fn when_the_status_is_unexpected_the_loop_waits_at_least_ten_seconds() {
    let harness = Harness::new(vec![Ok(HttpResponse::new(404, "not found")
        .with_header("X-RateLimit-Remaining", "50")
        .with_header("X-RateLimit-Reset", (START + 50).to_string()))]);
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    let report = poller.poll_once().await;

    assert_eq!(report.outcome, OutcomeKind::Unexpected);
    assert_eq!(report.delay, Duration::from_secs(10));
    assert_eq!(harness.tokens.load().await, None);
}

#[tokio::test]
async fn when_a_200_body_is_not_an_event_list_no_token_is_saved() {
    let harness = Harness::new(vec![Ok(HttpResponse::ok_json(r#"{"message":"oops"}"#)
        .with_header("ETag", "\"bogus\""))]);
    let poller = harness.poller(Arc::new(RecordingSink::default()));

    let report = poller.poll_once().await;

    assert_eq!(report.outcome, OutcomeKind::Unexpected);
    assert_eq!(harness.tokens.load().await, None);
    assert!(report.delay >= Duration::from_secs(10));
}

// =============================================================================
// Storage failures
// =============================================================================

#[tokio::test]
async fn when_storage_fails_the_cycle_reports_it_and_the_next_cycle_still_runs() {
    // Given: A sink that always errors
    let harness = Harness::new(vec![
        Ok(five_event_page().with_header("ETag", "\"v1\"")),
        Ok(not_modified(100)),
    ]);
    let poller = harness.poller(Arc::new(FailingSink));

    // When: Two cycles run
    let first = poller.poll_once().await;
    let second = poller.poll_once().await;

    // Then: The failure is reported, the token still advanced, polling goes on
    assert!(matches!(&first.storage, StorageStatus::Failed(detail) if detail.contains("disk full")));
    assert_eq!(first.delay, Duration::from_secs(10));
    assert_eq!(harness.tokens.load().await.as_deref(), Some("\"v1\""));
    assert_eq!(second.outcome, OutcomeKind::NotModified);
}

#[tokio::test]
async fn when_storage_panics_the_panic_is_contained() {
    let harness = Harness::new(vec![Ok(five_event_page()), Ok(not_modified(100))]);
    let poller = harness.poller(Arc::new(PanickingSink));

    let first = poller.poll_once().await;
    let second = poller.poll_once().await;

    assert!(matches!(&first.storage, StorageStatus::Failed(detail) if detail.starts_with("storage task failed")));
    assert_eq!(second.outcome, OutcomeKind::NotModified);
}

// =============================================================================
// End to end with DuckDB
// =============================================================================

#[tokio::test]
async fn when_the_same_page_is_fetched_twice_the_warehouse_keeps_one_row_per_event() {
    // Given: A real warehouse and a feed that serves the same page twice
    let harness = Harness::new(vec![Ok(five_event_page()), Ok(five_event_page())]);
    let db_dir = tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::new(db_dir.path().join("events.duckdb")))
        .expect("warehouse open");
    let poller = harness.poller(Arc::new(warehouse.clone()));

    // When: Two cycles run
    let first = poller.poll_once().await;
    let second = poller.poll_once().await;

    // Then: The second batch is all duplicates
    assert_eq!(
        first.storage,
        StorageStatus::Stored(IngestReport {
            inserted: 3,
            duplicates: 0,
            skipped: 0,
        })
    );
    assert_eq!(
        second.storage,
        StorageStatus::Stored(IngestReport {
            inserted: 0,
            duplicates: 3,
            skipped: 0,
        })
    );
    assert_eq!(warehouse.count_events().expect("count"), 3);
}

// =============================================================================
// Background task
// =============================================================================

#[tokio::test]
async fn when_spawned_the_loop_keeps_polling_through_failures_until_aborted() {
    // Given: A feed that answers once and then drops every connection
    let http = Arc::new(ScriptedHttpClient::new([Ok(five_event_page())]));
    let temp = tempdir().expect("tempdir");
    let clock = Arc::new(YieldingClock {
        inner: ManualClock::new(at(0)),
    });
    let sink = Arc::new(RecordingSink::default());
    let poller = Poller::new(
        FeedClient::new(http.clone(), "https://api.github.test/events", HttpAuth::None),
        ValidatorTokenFile::new(temp.path().join("github_etag.txt")),
        sink.clone(),
        clock.clone(),
    );

    // When: The loop runs in the background for a while
    let handle = poller.spawn();
    for _ in 0..400 {
        if http.requests().len() >= 11 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.abort();

    // Then: It got past the first page and two exhausted cycles
    assert!(http.requests().len() >= 11);
    assert_eq!(sink.batches().len(), 1);
    let first_sleeps: Vec<Duration> = clock.inner.sleeps().into_iter().take(7).collect();
    assert_eq!(
        first_sleeps,
        [10, 2, 4, 8, 16, 32, 60].map(Duration::from_secs).to_vec()
    );
    assert!(handle.await.expect_err("aborted").is_cancelled());
}
