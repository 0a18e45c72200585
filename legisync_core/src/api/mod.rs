//! Paginated API client for envelope-wrapped upstream APIs.

pub mod client;
pub mod envelope;
pub mod throttle;
pub mod transport;

use futures_util::Stream;
use std::pin::Pin;

/// Lazy sequence of decoded items (or the error that ended it).
pub type ItemStream<T> = Pin<Box<dyn Stream<Item = crate::Result<T>> + Send + 'static>>;

/// Query parameters, in order.
pub type Params = Vec<(String, String)>;

/// Build owned query parameters from string pairs.
pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
