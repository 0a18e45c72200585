use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Per-endpoint request spacing.
///
/// Callers for the same endpoint queue on that endpoint's slot (FIFO, since the tokio
/// mutex is fair) and are released at least `min_interval` apart. Distinct endpoints
/// never wait on each other.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, endpoint: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Wait for this endpoint's next free slot and claim it.
    pub async fn acquire(&self, endpoint: &str) {
        let slot = self.slot(endpoint);
        let mut next = slot.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.min_interval);
    }

    /// Push the endpoint's next slot out, e.g. after an upstream `Retry-After`.
    pub async fn defer(&self, endpoint: &str, delay: Duration) {
        let slot = self.slot(endpoint);
        let mut next = slot.lock().await;
        let at = Instant::now() + delay;
        if next.map(|n| n < at).unwrap_or(true) {
            *next = Some(at);
        }
    }
}

/// Throttle key of a route: its first path segment (`bills/2025/S1` -> `bills`).
pub fn endpoint_key(path: &str) -> &str {
    path.trim_start_matches('/')
        .split(|c| c == '/' || c == '?')
        .next()
        .unwrap_or("")
}
