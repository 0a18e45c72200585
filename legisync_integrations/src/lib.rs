//! Jurisdiction plugins for legisync, each behind its own cargo feature.

pub mod catalog;
pub mod jurisdictions;

pub use catalog::{builtin_catalog, default_registry_config};
