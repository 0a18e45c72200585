//! Tracing bootstrap.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `LEGISYNC_LOG_FORMAT=pretty` selects plain text; anything else is JSON.
    pub fn from_env() -> Self {
        match std::env::var("LEGISYNC_LOG_FORMAT") {
            Ok(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// Fails with `Conflict` if a global subscriber is already set.
pub fn init_global(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let res = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    res.map_err(|e| Error::Conflict(format!("tracing already initialized: {e}")))
}

pub fn init_global_from_env() -> Result<()> {
    init_global(LogFormat::from_env())
}
