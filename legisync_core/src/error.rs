use std::error::Error as StdError;
use std::time::Duration;

use crate::api::envelope::ApiError;
use crate::models::EntityType;

/// Common error type for `legisync_core`.
///
/// Foreign errors (reqwest, serde_json, io) should keep their chain via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Network or HTTP failure. Retried by the API client up to its attempt budget.
    #[error("transport error on {endpoint}: {message}")]
    Transport {
        endpoint: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },

    /// The upstream answered with a `success: false` envelope.
    #[error("upstream error: {0}")]
    Upstream(ApiError),

    #[error("malformed {entity_type} record '{key}': {reason}")]
    MalformedRecord {
        entity_type: EntityType,
        key: String,
        reason: String,
    },

    #[error("plugin '{0}' used before initialize")]
    NotInitialized(String),

    #[error("store write failed for {key}: {message}")]
    StoreWrite { key: String, message: String },

    #[error("sync run cancelled: {0}")]
    Cancelled(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "legisync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            status: None,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn malformed(
        entity_type: EntityType,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            entity_type,
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn store_write(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Only transport failures are worth repeating; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Upstream-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Transport { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(Error::transport("bills/2025", "connection reset").is_retryable());
        assert!(!Error::NotInitialized("ny_senate".to_string()).is_retryable());
        assert!(
            !Error::Upstream(ApiError {
                code: 1,
                message: "bad key".to_string(),
                data: None,
            })
            .is_retryable()
        );
    }

    #[test]
    fn malformed_message_names_record() {
        let e = Error::malformed(EntityType::Bill, "S1-2025", "missing session");
        assert_eq!(
            e.to_string(),
            "malformed bill record 'S1-2025': missing session"
        );
    }
}
