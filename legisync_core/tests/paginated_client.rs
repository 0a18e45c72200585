mod common;

use common::*;
use futures_util::TryStreamExt;
use legisync_core::api::client::{ClientConfig, PaginatedClient, RetryPolicy};
use legisync_core::api::params;
use legisync_core::api::transport::TransportResponse;
use legisync_core::Error;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> ClientConfig {
    ClientConfig::new("https://api.test/v3")
        .with_api_key("secret")
        .with_page_limit(10)
        .with_min_request_interval(Duration::ZERO)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        })
}

/// A 0-based collection of `total` numbered items.
fn collection(total: u64) -> impl Fn(&Request) -> legisync_core::Result<TransportResponse> {
    move |req| {
        let offset: u64 = req.param("offset").unwrap().parse().unwrap();
        let limit: u64 = req.param("limit").unwrap().parse().unwrap();
        let end = (offset + limit).min(total);
        let items: Vec<Value> = (offset..end).map(|n| json!({"n": n})).collect();
        ok(json!({
            "success": true,
            "message": "",
            "responseType": "thing list",
            "total": total,
            "offsetStart": offset,
            "offsetEnd": end.saturating_sub(1),
            "limit": limit,
            "result": {"items": items, "size": items.len()}
        }))
    }
}

#[tokio::test]
async fn fetch_all_walks_every_page_once_in_order() {
    let transport = Arc::new(ScriptedTransport::new(collection(25)));
    let client = PaginatedClient::new(config(), transport.clone()).unwrap();

    let items: Vec<Value> = client
        .fetch_all("things/2025", params(&[("full", "true")]))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(items.len(), 25);
    let ns: Vec<u64> = items.iter().map(|v| v["n"].as_u64().unwrap()).collect();
    assert_eq!(ns, (0..25).collect::<Vec<_>>());

    let requests = transport.requests();
    let offsets: Vec<&str> = requests.iter().map(|r| r.param("offset").unwrap()).collect();
    assert_eq!(offsets, vec!["0", "10", "20"]);
    assert!(requests.iter().all(|r| r.url == "https://api.test/v3/things/2025"));
    assert!(requests.iter().all(|r| r.param("key") == Some("secret")));
    assert!(requests.iter().all(|r| r.param("full") == Some("true")));
}

#[tokio::test]
async fn one_based_apis_start_at_one() {
    let transport = Arc::new(ScriptedTransport::new(|req: &Request| {
        let offset = req.param("offset").unwrap().to_string();
        let items: Vec<Value> = if offset == "1" {
            (1..=10).map(|n| json!(n)).collect()
        } else {
            vec![json!(11), json!(12)]
        };
        ok(json!({
            "success": true,
            "total": 12,
            "offsetStart": offset.parse::<u64>().unwrap(),
            "offsetEnd": if offset == "1" { 10 } else { 12 },
            "result": {"items": items, "size": items.len()}
        }))
    }));
    let client = PaginatedClient::new(config().with_offset_base(1), transport.clone()).unwrap();
    let items: Vec<u64> = client
        .fetch_all::<u64>("things", Vec::new())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, (1..=12).collect::<Vec<_>>());
    let offsets: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.param("offset").unwrap().to_string())
        .collect();
    assert_eq!(offsets, vec!["1", "11"]);
}

#[tokio::test]
async fn error_envelope_ends_the_stream_without_retry() {
    let transport = Arc::new(ScriptedTransport::new(|req: &Request| {
        if req.param("offset") == Some("0") {
            collection(30)(req)
        } else {
            ok(json!({"success": false, "message": "Invalid session year", "errorCode": 4}))
        }
    }));
    let client = PaginatedClient::new(config(), transport.clone()).unwrap();
    let mut seen = 0;
    let mut stream = client.fetch_all::<Value>("things", Vec::new());
    let err = loop {
        match stream.try_next().await {
            Ok(Some(_)) => seen += 1,
            Ok(None) => panic!("stream should fail"),
            Err(e) => break e,
        }
    };
    assert_eq!(seen, 10);
    assert!(matches!(err, Error::Upstream(ref e) if e.code == 4));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried_up_to_the_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let transport = Arc::new(ScriptedTransport::new(move |_req: &Request| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            return Ok(TransportResponse {
                status: 503,
                retry_after: None,
                body: None,
            });
        }
        ok(json!({"success": true, "result": {"printNo": "S1"}}))
    }));
    let client = PaginatedClient::new(config(), transport).unwrap();
    let bill: Value = client.fetch_one("bills/2025/S1", &[]).await.unwrap();
    assert_eq!(bill["printNo"], "S1");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let always_down = Arc::new(ScriptedTransport::new(|_req: &Request| {
        Err(Error::transport("bills", "connection refused"))
    }));
    let client = PaginatedClient::new(config(), always_down.clone()).unwrap();
    let err = client
        .fetch_one::<Value>("bills/2025/S1", &[])
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(always_down.requests().len(), 3);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(|_req: &Request| {
        Ok(TransportResponse {
            status: 404,
            retry_after: None,
            body: None,
        })
    }));
    let client = PaginatedClient::new(config(), transport.clone()).unwrap();
    let err = client.fetch_one::<Value>("bills/2025/S9", &[]).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(transport.requests().len(), 1);
}
