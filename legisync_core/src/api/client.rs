use async_stream::try_stream;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::api::envelope::{ApiError, Envelope};
use crate::api::throttle::{endpoint_key, Throttle};
use crate::api::transport::{HttpTransport, ReqwestTransport, TransportResponse};
use crate::api::{ItemStream, Params};
use crate::{Error, Result};

/// Bounded exponential backoff for transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^retry`, capped at `backoff_max_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.min(63);
        let exp = 1u128 << shift;
        let ms = (self.backoff_base_ms as u128).saturating_mul(exp);
        Duration::from_millis(ms.min(self.backoff_max_ms as u128) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Query parameter carrying the API key.
    pub api_key_param: String,
    pub page_limit: u32,
    /// Offset of the first item (0, or 1 for APIs that count from one).
    pub offset_base: u64,
    pub min_request_interval: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            api_key_param: "key".to_string(),
            page_limit: 100,
            offset_base: 0,
            min_request_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn with_offset_base(mut self, offset_base: u64) -> Self {
        self.offset_base = offset_base;
        self
    }

    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("api base_url is empty".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api base_url '{}' must be http(s)",
                self.base_url
            )));
        }
        if self.page_limit == 0 {
            return Err(Error::Config("page_limit must be > 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be > 0".to_string()));
        }
        Ok(())
    }
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    throttle: Throttle,
}

/// HTTP client for envelope-wrapped, offset/limit paginated APIs.
///
/// Cheap to clone; clones share one throttle.
#[derive(Clone)]
pub struct PaginatedClient {
    inner: Arc<Inner>,
}

impl PaginatedClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let throttle = Throttle::new(config.min_request_interval);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                throttle,
            }),
        })
    }

    pub fn with_reqwest(config: ClientConfig, timeout: Duration) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(timeout)?);
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        format!("{}/{}", self.inner.config.base_url, endpoint)
    }

    fn query(&self, params: &[(String, String)]) -> Params {
        let mut query: Params = params.to_vec();
        if let Some(key) = &self.inner.config.api_key {
            query.push((self.inner.config.api_key_param.clone(), key.clone()));
        }
        query
    }

    fn interpret(&self, endpoint: &str, resp: TransportResponse) -> Result<Envelope> {
        let TransportResponse {
            status,
            retry_after,
            body,
        } = resp;

        if status == 429 || status >= 500 {
            return Err(Error::Transport {
                endpoint: endpoint.to_string(),
                status: Some(status),
                retry_after,
                message: format!("upstream returned HTTP {status}"),
            });
        }

        let Some(body) = body else {
            if status == 404 {
                return Err(Error::NotFound(format!("{endpoint} (HTTP 404)")));
            }
            return Err(Error::Transport {
                endpoint: endpoint.to_string(),
                status: Some(status),
                retry_after: None,
                message: "response body is not JSON".to_string(),
            });
        };

        match Envelope::parse(body) {
            Ok(env) => Ok(env),
            Err(_) if (200..300).contains(&status) => Err(Error::Transport {
                endpoint: endpoint.to_string(),
                status: Some(status),
                retry_after: None,
                message: "response is not an api envelope".to_string(),
            }),
            Err(_) if status == 404 => Err(Error::NotFound(format!("{endpoint} (HTTP 404)"))),
            Err(_) => Ok(Envelope::Error(ApiError {
                code: status as i64,
                message: format!("upstream returned HTTP {status}"),
                data: None,
            })),
        }
    }

    /// Issue one GET, honoring the endpoint throttle and retrying transport failures.
    #[tracing::instrument(level = "debug", skip(self, params))]
    pub async fn get_envelope(&self, endpoint: &str, params: &[(String, String)]) -> Result<Envelope> {
        let retry = &self.inner.config.retry;
        let key = endpoint_key(endpoint).to_string();
        let url = self.url(endpoint);
        let query = self.query(params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.inner.throttle.acquire(&key).await;
            let res = match self.inner.transport.get(&url, &query).await {
                Ok(resp) => self.interpret(endpoint, resp),
                Err(e) => Err(e),
            };
            match res {
                Ok(env) => return Ok(env),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    tracing::warn!(endpoint, attempt, error = %e, "retrying upstream request");
                    match e.retry_after() {
                        Some(delay) => self.inner.throttle.defer(&key, delay).await,
                        None => tokio::time::sleep(retry.backoff(attempt - 1)).await,
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch one page starting at `offset`.
    #[tracing::instrument(level = "debug", skip(self, params))]
    pub async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        offset: u64,
        limit: u64,
    ) -> Result<Envelope> {
        let mut query = params.to_vec();
        query.push(("offset".to_string(), offset.to_string()));
        query.push(("limit".to_string(), limit.to_string()));
        self.get_envelope(endpoint, &query).await
    }

    /// Fetch a single-result endpoint and decode it.
    #[tracing::instrument(level = "debug", skip(self, params))]
    pub async fn fetch_one<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<T> {
        let value = self.get_envelope(endpoint, params).await?.into_single()?;
        serde_json::from_value(value).map_err(|e| Error::backend("decode single result", e))
    }

    /// Lazily walk every page of a collection in upstream order.
    ///
    /// Stops when a page is short, when `offsetEnd >= total`, or when `total` items have
    /// been seen. A failed page ends the stream with that error; nothing is skipped.
    pub fn fetch_all<T>(&self, endpoint: impl Into<String>, params: Params) -> ItemStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        let endpoint = endpoint.into();
        Box::pin(try_stream! {
            let limit = client.inner.config.page_limit as u64;
            let mut offset = client.inner.config.offset_base;
            let mut seen = 0u64;
            loop {
                let page = client
                    .fetch_page(&endpoint, &params, offset, limit)
                    .await?
                    .into_page()?;
                let count = page.items.len() as u64;
                seen += count;
                let done = count < limit
                    || page.total.map(|total| {
                        seen >= total || page.offset_end.map(|end| end >= total).unwrap_or(false)
                    })
                    .unwrap_or(false);

                for item in page.items {
                    let decoded: T = serde_json::from_value(item)
                        .map_err(|e| Error::backend("decode page item", e))?;
                    yield decoded;
                }

                if done {
                    break;
                }
                offset += count;
            }
        })
    }
}
