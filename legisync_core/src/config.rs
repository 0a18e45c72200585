use chrono::{Datelike, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::api::client::{ClientConfig, RetryPolicy};
use crate::{Error, Result};

/// Engine-wide knobs for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    /// Jurisdictions processed concurrently.
    pub max_concurrent_jurisdictions: usize,
    pub page_limit: u32,
    pub min_request_interval_ms: u64,
    pub http_timeout_ms: u64,

    pub max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,

    /// Store writes per entity, including the first (2 means retried once).
    pub store_write_attempts: u32,

    /// Whole-run deadline. `None` runs until done or cancelled.
    pub run_timeout_secs: Option<u64>,

    /// Law ids swept by the law task.
    pub law_ids: Vec<String>,
    /// Year used for calendars, transcripts and session selection.
    pub sync_year: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jurisdictions: 4,
            page_limit: 100,
            min_request_interval_ms: 250,
            http_timeout_ms: 20_000,
            max_attempts: 4,
            retry_backoff_base_ms: 500,
            retry_backoff_max_ms: 30_000,
            store_write_attempts: 2,
            run_timeout_secs: None,
            law_ids: Vec::new(),
            sync_year: Utc::now().year(),
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults; set but
    /// unparseable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            max_concurrent_jurisdictions: parse(
                &lookup,
                "LEGISYNC_MAX_CONCURRENT_JURISDICTIONS",
                d.max_concurrent_jurisdictions,
            )?,
            page_limit: parse(&lookup, "LEGISYNC_PAGE_LIMIT", d.page_limit)?,
            min_request_interval_ms: parse(
                &lookup,
                "LEGISYNC_MIN_REQUEST_INTERVAL_MS",
                d.min_request_interval_ms,
            )?,
            http_timeout_ms: parse(&lookup, "LEGISYNC_HTTP_TIMEOUT_MS", d.http_timeout_ms)?,
            max_attempts: parse(&lookup, "LEGISYNC_MAX_ATTEMPTS", d.max_attempts)?,
            retry_backoff_base_ms: parse(
                &lookup,
                "LEGISYNC_RETRY_BACKOFF_BASE_MS",
                d.retry_backoff_base_ms,
            )?,
            retry_backoff_max_ms: parse(
                &lookup,
                "LEGISYNC_RETRY_BACKOFF_MAX_MS",
                d.retry_backoff_max_ms,
            )?,
            store_write_attempts: parse(
                &lookup,
                "LEGISYNC_STORE_WRITE_ATTEMPTS",
                d.store_write_attempts,
            )?,
            run_timeout_secs: match lookup("LEGISYNC_RUN_TIMEOUT_SECS") {
                Some(v) if !v.trim().is_empty() => Some(parse_value("LEGISYNC_RUN_TIMEOUT_SECS", &v)?),
                _ => None,
            },
            law_ids: lookup("LEGISYNC_LAW_IDS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_ascii_uppercase())
                        .collect()
                })
                .unwrap_or_default(),
            sync_year: parse(&lookup, "LEGISYNC_SYNC_YEAR", d.sync_year)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jurisdictions == 0 {
            return Err(Error::Config(
                "max_concurrent_jurisdictions must be > 0".to_string(),
            ));
        }
        if self.page_limit == 0 {
            return Err(Error::Config("page_limit must be > 0".to_string()));
        }
        if self.http_timeout_ms == 0 {
            return Err(Error::Config("http_timeout_ms must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be > 0".to_string()));
        }
        if self.retry_backoff_base_ms == 0 {
            return Err(Error::Config("retry_backoff_base_ms must be > 0".to_string()));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(Error::Config(
                "retry_backoff_max_ms must be >= retry_backoff_base_ms".to_string(),
            ));
        }
        if self.store_write_attempts == 0 {
            return Err(Error::Config("store_write_attempts must be > 0".to_string()));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(Error::Config("run_timeout_secs must be > 0 when set".to_string()));
        }
        if !(1800..=9999).contains(&self.sync_year) {
            return Err(Error::Config(format!(
                "sync_year {} is out of range",
                self.sync_year
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base_ms: self.retry_backoff_base_ms,
            backoff_max_ms: self.retry_backoff_max_ms,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Client settings for one plugin's API, carrying this config's paging and retry knobs.
    pub fn client_config(&self, base_url: &str, api_key: &str) -> ClientConfig {
        let mut cfg = ClientConfig::new(base_url)
            .with_page_limit(self.page_limit)
            .with_min_request_interval(Duration::from_millis(self.min_request_interval_ms))
            .with_retry(self.retry_policy());
        if !api_key.is_empty() {
            cfg = cfg.with_api_key(api_key);
        }
        cfg
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => parse_value(key, &v),
        _ => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key}='{raw}' is not a valid value")))
}
