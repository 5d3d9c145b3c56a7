//! # Ferrofeed Core
//!
//! Rate-limit-aware poller for the GitHub public event feed.
//!
//! ## Overview
//!
//! - **Conditional fetch** with `If-None-Match`, classified into [`FetchOutcome`]
//! - **Quota parsing** of `x-ratelimit-*` headers into [`RateLimitSnapshot`]
//! - **Bounded retry** with exponential backoff for transient failures
//! - **Pacing** that spreads the remaining quota evenly until reset
//! - **Polling loop** forwarding allow-listed events to an [`EventSink`]
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`clock`] | Injectable time source and sleep |
//! | [`config`] | Environment configuration |
//! | [`domain`] | Event and timestamp types |
//! | [`error`] | Core error types |
//! | [`fetch`] | Conditional fetch client and response classification |
//! | [`http_client`] | HTTP client abstraction |
//! | [`pacing`] | Delay before the next poll |
//! | [`poller`] | The polling loop |
//! | [`rate_limit`] | Quota header parsing |
//! | [`retry`] | Retry/backoff controller |
//! | [`sink`] | Storage collaborator |
//! | [`validator`] | Validator token file |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrofeed_core::{FeedConfig, Poller};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FeedConfig::from_env()?;
//!     let poller = Poller::from_config(&config)?;
//!
//!     // Runs until the process exits.
//!     poller.spawn().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Polling Loop   │────▶│ Storage (sink)   │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Retry/Backoff   │────▶│ Validator token  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Fetch Client    │────▶│ HTTP Client      │
//! └────────┬────────┘     │ (reqwest/script) │
//!          │              └──────────────────┘
//!          ▼
//! ┌─────────────────┐
//! │ Rate limit →    │
//! │ Pacing delay    │
//! └─────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod http_client;
pub mod pacing;
pub mod poller;
pub mod rate_limit;
pub mod retry;
pub mod sink;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FeedConfig;
pub use domain::{Event, EventKind, UtcDateTime};
pub use error::{CoreError, ValidationError};
pub use fetch::{FeedClient, FetchOutcome, OutcomeKind, DEFAULT_FEED_URL};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use pacing::{next_delay, wait_for_reset, PacingPolicy};
pub use poller::{CycleReport, Poller, StorageStatus};
pub use rate_limit::RateLimitSnapshot;
pub use retry::{run_with_retry, BackoffState, RetryConfig};
pub use sink::EventSink;
pub use validator::ValidatorTokenFile;
