//! Jurisdiction plugin contract.
//!
//! One implementation per legislative source. The orchestrator only talks to this
//! trait; it never branches on which jurisdiction it is driving.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::api::ItemStream;
use crate::models::{CanonicalEntity, EntityType, JurisdictionId, SourceRecord};
use crate::tracker::models::UpdateFeed;
use crate::{Error, Result};

/// Lazy sequence of raw upstream records.
pub type RecordStream = ItemStream<SourceRecord>;

/// Connection settings handed to a plugin once, at initialization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub api_key: String,
    pub base_url: String,
}

impl PluginConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(Error::Config("plugin base_url is empty".to_string()));
        }
        Ok(Self {
            api_key: api_key.into(),
            base_url,
        })
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Entity types a plugin serves, and which of them have an upstream update feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub entity_types: Vec<EntityType>,
    pub update_feeds: Vec<EntityType>,
}

impl Capabilities {
    pub fn supports(&self, entity_type: EntityType) -> bool {
        // Sponsorships are derived from bills, never fetched.
        entity_type == EntityType::Sponsorship || self.entity_types.contains(&entity_type)
    }

    pub fn has_update_feed(&self, entity_type: EntityType) -> bool {
        self.update_feeds.contains(&entity_type)
    }
}

#[async_trait]
pub trait JurisdictionPlugin: Send + Sync {
    fn jurisdiction(&self) -> JurisdictionId;

    fn capabilities(&self) -> Capabilities;

    /// Must be called exactly once before any fetch.
    fn initialize(&self, config: PluginConfig) -> Result<()>;

    fn fetch_bills(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream>;

    fn fetch_members(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream>;

    fn fetch_committees(&self) -> Result<RecordStream> {
        Err(unsupported(self.jurisdiction(), EntityType::Committee))
    }

    fn fetch_calendars(&self, _year: i32) -> Result<RecordStream> {
        Err(unsupported(self.jurisdiction(), EntityType::Calendar))
    }

    fn fetch_laws(&self, _law_id: &str) -> Result<RecordStream> {
        Err(unsupported(self.jurisdiction(), EntityType::Law))
    }

    fn fetch_transcripts(&self, _year: i32) -> Result<RecordStream> {
        Err(unsupported(self.jurisdiction(), EntityType::Transcript))
    }

    /// Change events newer than `since`, or `None` if this entity type has no feed.
    async fn fetch_updates(
        &self,
        _entity_type: EntityType,
        _since: DateTime<Utc>,
    ) -> Result<Option<UpdateFeed>> {
        Ok(None)
    }

    /// Fetch one record by canonical id. `None` if the upstream no longer has it.
    async fn fetch_record(&self, entity_type: EntityType, _id: &str) -> Result<Option<SourceRecord>> {
        Err(unsupported(self.jurisdiction(), entity_type))
    }

    /// Pure mapping from a raw record to its canonical form.
    fn normalize(&self, record: &SourceRecord) -> Result<CanonicalEntity>;
}

fn unsupported(jurisdiction: JurisdictionId, entity_type: EntityType) -> Error {
    Error::InvalidInput(format!(
        "jurisdiction '{jurisdiction}' does not provide {entity_type} records"
    ))
}

/// Write-once holder for a plugin's initialized state.
pub struct InitCell<T> {
    plugin: &'static str,
    cell: OnceLock<T>,
}

impl<T> InitCell<T> {
    pub const fn new(plugin: &'static str) -> Self {
        Self {
            plugin,
            cell: OnceLock::new(),
        }
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| Error::Conflict(format!("plugin '{}' already initialized", self.plugin)))
    }

    pub fn get(&self) -> Result<&T> {
        self.cell
            .get()
            .ok_or_else(|| Error::NotInitialized(self.plugin.to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
