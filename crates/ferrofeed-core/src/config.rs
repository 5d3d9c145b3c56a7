//! Process configuration read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FERROFEED_GITHUB_TOKEN` (or `GITHUB_TOKEN`) | none, required to poll |
//! | `FERROFEED_FEED_URL` | `https://api.github.com/events` |
//! | `FERROFEED_HOME` | `$HOME/.ferrofeed` |
//! | `FERROFEED_DB_PATH` | `<home>/events.duckdb` |
//! | `FERROFEED_ETAG_PATH` | `<home>/github_etag.txt` |
//! | `FERROFEED_REQUEST_TIMEOUT_MS` | `10000` |
//! | `FERROFEED_MAX_RETRIES` | `5` |

use std::env;
use std::path::PathBuf;

use ferrofeed_warehouse::WarehouseConfig;

use crate::fetch::DEFAULT_FEED_URL;
use crate::http_client::HttpAuth;
use crate::retry::RetryConfig;
use crate::ValidationError;

const TOKEN_VAR: &str = "FERROFEED_GITHUB_TOKEN";
const TOKEN_FALLBACK_VAR: &str = "GITHUB_TOKEN";
const FEED_URL_VAR: &str = "FERROFEED_FEED_URL";
const HOME_VAR: &str = "FERROFEED_HOME";
const DB_PATH_VAR: &str = "FERROFEED_DB_PATH";
const ETAG_PATH_VAR: &str = "FERROFEED_ETAG_PATH";
const TIMEOUT_VAR: &str = "FERROFEED_REQUEST_TIMEOUT_MS";
const MAX_RETRIES_VAR: &str = "FERROFEED_MAX_RETRIES";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub github_token: Option<String>,
    pub feed_url: String,
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub etag_path: PathBuf,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("feed_url", &self.feed_url)
            .field("home", &self.home)
            .field("db_path", &self.db_path)
            .field("etag_path", &self.etag_path)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("retry", &self.retry)
            .finish()
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let home = get(HOME_VAR)
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|home| PathBuf::from(home).join(".ferrofeed")))
            .unwrap_or_else(|| PathBuf::from(".ferrofeed"));
        let db_path = get(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("events.duckdb"));
        let etag_path = get(ETAG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("github_etag.txt"));

        let request_timeout_ms =
            parse_number(TIMEOUT_VAR, get(TIMEOUT_VAR))?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let mut retry = RetryConfig::default();
        if let Some(max_retries) = parse_number(MAX_RETRIES_VAR, get(MAX_RETRIES_VAR))? {
            retry.max_retries = max_retries;
        }

        Ok(Self {
            github_token: get(TOKEN_VAR).or_else(|| get(TOKEN_FALLBACK_VAR)),
            feed_url: get(FEED_URL_VAR).unwrap_or_else(|| DEFAULT_FEED_URL.to_owned()),
            home,
            db_path,
            etag_path,
            request_timeout_ms,
            retry,
        })
    }

    /// Credential for the feed; polling without one is refused.
    pub fn auth(&self) -> Result<HttpAuth, ValidationError> {
        self.github_token
            .clone()
            .map(HttpAuth::Token)
            .ok_or(ValidationError::MissingSetting { name: TOKEN_VAR })
    }

    /// Storage settings; the warehouse reads nothing from the environment
    /// itself.
    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::new(self.db_path.clone())
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ValidationError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ValidationError::InvalidSetting { name, value: raw })
        })
        .transpose()
}
