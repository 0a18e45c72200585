//! Uniform success/error wrapper used by upstream legislative APIs.
//!
//! ```json
//! {"success": true, "message": "", "responseType": "bill-info list",
//!  "result": {"items": [...], "size": 10}, "offsetStart": 1, "offsetEnd": 10, "total": 25}
//! ```
//!
//! Pagination fields are accepted either inside `result` or at the top level.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Error, Result};

/// Failure carried by a `success: false` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// One page of an offset/limit collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemsPage<T> {
    pub items: Vec<T>,
    pub size: usize,
    pub offset_start: Option<u64>,
    pub offset_end: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    Single(Value),
    Items(ItemsPage<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success {
        message: Option<String>,
        response_type: Option<String>,
        body: EnvelopeBody,
    },
    Error(ApiError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageFields {
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    offset_start: Option<u64>,
    #[serde(default)]
    offset_end: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response_type: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_data: Option<Value>,
    #[serde(flatten)]
    page: PageFields,
}

impl Envelope {
    pub fn parse(value: Value) -> Result<Self> {
        let raw: RawEnvelope =
            serde_json::from_value(value).map_err(|e| Error::backend("decode api envelope", e))?;

        if !raw.success {
            return Ok(Envelope::Error(ApiError {
                code: raw.error_code.unwrap_or(-1),
                message: raw
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "upstream reported failure".to_string()),
                data: raw.error_data,
            }));
        }

        let result = raw.result.unwrap_or(Value::Null);
        let body = match result {
            Value::Object(mut obj) if obj.get("items").map(Value::is_array).unwrap_or(false) => {
                let items = match obj.remove("items") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                let inner: PageFields =
                    serde_json::from_value(Value::Object(obj)).unwrap_or_default();
                EnvelopeBody::Items(ItemsPage {
                    size: inner.size.or(raw.page.size).unwrap_or(items.len()),
                    offset_start: inner.offset_start.or(raw.page.offset_start),
                    offset_end: inner.offset_end.or(raw.page.offset_end),
                    total: inner.total.or(raw.page.total),
                    items,
                })
            }
            other => EnvelopeBody::Single(other),
        };

        Ok(Envelope::Success {
            message: raw.message,
            response_type: raw.response_type,
            body,
        })
    }

    /// Unwrap a paginated body. A single-result body is treated as a one-item page.
    pub fn into_page(self) -> Result<ItemsPage<Value>> {
        match self {
            Envelope::Error(e) => Err(Error::Upstream(e)),
            Envelope::Success {
                body: EnvelopeBody::Items(page),
                ..
            } => Ok(page),
            Envelope::Success {
                body: EnvelopeBody::Single(Value::Null),
                ..
            } => Ok(ItemsPage {
                items: Vec::new(),
                size: 0,
                offset_start: None,
                offset_end: None,
                total: Some(0),
            }),
            Envelope::Success {
                body: EnvelopeBody::Single(v),
                ..
            } => Ok(ItemsPage {
                items: vec![v],
                size: 1,
                offset_start: None,
                offset_end: None,
                total: Some(1),
            }),
        }
    }

    pub fn into_single(self) -> Result<Value> {
        match self {
            Envelope::Error(e) => Err(Error::Upstream(e)),
            Envelope::Success {
                body: EnvelopeBody::Single(v),
                ..
            } => Ok(v),
            Envelope::Success {
                body: EnvelopeBody::Items(_),
                ..
            } => Err(Error::InvalidInput(
                "expected a single result but the upstream returned a page".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_page_with_top_level_offsets() {
        let env = Envelope::parse(json!({
            "success": true,
            "message": "",
            "responseType": "member list",
            "total": 25,
            "offsetStart": 11,
            "offsetEnd": 20,
            "limit": 10,
            "result": {"items": [{"memberId": 1}, {"memberId": 2}], "size": 2}
        }))
        .unwrap();
        let page = env.into_page().unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, Some(25));
        assert_eq!(page.offset_start, Some(11));
        assert_eq!(page.offset_end, Some(20));
    }

    #[test]
    fn parses_page_with_nested_offsets() {
        let env = Envelope::parse(json!({
            "success": true,
            "result": {"items": [], "size": 0, "offsetStart": 0, "offsetEnd": 0, "total": 0}
        }))
        .unwrap();
        let page = env.into_page().unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, Some(0));
    }

    #[test]
    fn failure_envelope_becomes_api_error() {
        let env = Envelope::parse(json!({
            "success": false,
            "message": "API key is invalid",
            "responseType": "error",
            "errorCode": 11,
            "errorData": {"key": "redacted"}
        }))
        .unwrap();
        match env.into_page() {
            Err(Error::Upstream(e)) => {
                assert_eq!(e.code, 11);
                assert_eq!(e.message, "API key is invalid");
                assert!(e.data.is_some());
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn single_result_is_not_a_page() {
        let env = Envelope::parse(json!({
            "success": true,
            "responseType": "law",
            "result": {"info": {"lawId": "ABC"}}
        }))
        .unwrap();
        let v = env.into_single().unwrap();
        assert_eq!(v["info"]["lawId"], "ABC");
    }
}
