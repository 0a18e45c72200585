//! Legislative data synchronization engine.
//!
//! Jurisdiction plugins expose a uniform fetch/normalize contract over heterogeneous
//! upstream APIs; the orchestrator drives full and incremental syncs into a canonical
//! store, using the change tracker's watermarks to avoid reprocessing.

pub mod api;
pub mod config;
pub mod error;
pub mod geocode;
pub mod models;
pub mod o11y;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod sync;
pub mod tracker;

pub use error::{Error, Result};
