use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use std::time::Duration;

use crate::{Error, Result};

/// What the client needs from one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    /// Parsed JSON body, or `None` when the body was empty or not JSON.
    pub body: Option<serde_json::Value>,
}

/// Minimal HTTP seam so the paginated client can be driven by scripted responses in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<TransportResponse>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend("build reqwest client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(level = "debug", skip(self, query))]
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<TransportResponse> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, HeaderValue::from_static("legisync"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::transport(url, e.to_string()))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| parse_retry_after(s, Utc::now()));

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::transport(url, e.to_string()))?;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// `Retry-After` as delta-seconds or as an HTTP-date. A date already past means "now".
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
