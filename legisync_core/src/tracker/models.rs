use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{EntityType, JurisdictionId};
use crate::{Error, Result};

/// One upstream change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateToken {
    /// Composite key of the changed record, in the canonical id form.
    pub id: String,
    pub content_type: EntityType,
    /// Upstream source of the change (file, feed entry, ...).
    pub source_id: String,
    pub source_date_time: DateTime<Utc>,
    /// Set only once the corresponding canonical write has been committed.
    pub processed_date_time: Option<DateTime<Utc>>,
}

impl UpdateToken {
    pub fn new(
        id: impl Into<String>,
        content_type: EntityType,
        source_id: impl Into<String>,
        source_date_time: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("update token id is empty".to_string()));
        }
        let source_id = source_id.into();
        if source_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "update token source_id is empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            content_type,
            source_id,
            source_date_time,
            processed_date_time: None,
        })
    }

    /// Identity used by the processed-token ledger.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.id,
            self.source_id,
            self.source_date_time.timestamp_micros()
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAction {
    Insert,
    Update,
    Delete,
}

/// Whether a digest describes the whole record or a sub-part of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestScope {
    Record,
    Field,
}

/// Field-level change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestUpdate {
    #[serde(flatten)]
    pub token: UpdateToken,
    pub action: DigestAction,
    pub scope: DigestScope,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub field_count: usize,
}

impl DigestUpdate {
    pub fn new(
        token: UpdateToken,
        action: DigestAction,
        scope: DigestScope,
        fields: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let field_count = fields.len();
        Self {
            token,
            action,
            scope,
            fields,
            field_count,
        }
    }

    /// A bare token: whole-record update with no field detail.
    pub fn from_token(token: UpdateToken) -> Self {
        Self::new(
            token,
            DigestAction::Update,
            DigestScope::Record,
            BTreeMap::new(),
        )
    }

    /// Keep a count reported by the upstream instead of the one derived from `fields`,
    /// so `validate` can catch digests whose field list was truncated.
    pub fn with_reported_field_count(mut self, count: usize) -> Self {
        self.field_count = count;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.field_count != self.fields.len() {
            return Err(Error::InvalidInput(format!(
                "digest {} reports fieldCount {} but carries {} fields",
                self.token.fingerprint(),
                self.field_count,
                self.fields.len()
            )));
        }
        Ok(())
    }
}

/// What an update feed returned for one range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateFeed {
    pub digests: Vec<DigestUpdate>,
    /// Entries that could not be tied to any record, described for the run report.
    pub unreadable: Vec<String>,
}

impl From<Vec<DigestUpdate>> for UpdateFeed {
    fn from(digests: Vec<DigestUpdate>) -> Self {
        Self {
            digests,
            unreadable: Vec::new(),
        }
    }
}

/// Row key of a watermark: one per jurisdiction and entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatermarkKey {
    pub jurisdiction: JurisdictionId,
    pub entity_type: EntityType,
}

impl WatermarkKey {
    pub fn new(jurisdiction: JurisdictionId, entity_type: EntityType) -> Self {
        Self {
            jurisdiction,
            entity_type,
        }
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.jurisdiction, self.entity_type)
    }
}

/// Cursor of the last committed point in a source's update stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub key: WatermarkKey,
    pub source_date_time: DateTime<Utc>,
    /// `source_id` of the newest committed token, for diagnostics.
    pub last_source_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    Idle,
    Scanning,
    Reconciling,
    Committed,
}

/// How a task fetches its records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// No usable watermark, or a full resync was requested: fetch everything.
    Full,
    /// The source has an update feed: fetch only the records it names.
    Incremental { since: DateTime<Utc> },
    /// No update feed: re-fetch with `since` and let unchanged upserts fall out.
    Snapshot { since: DateTime<Utc> },
}

impl SyncMode {
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncMode::Full => None,
            SyncMode::Incremental { since } | SyncMode::Snapshot { since } => Some(*since),
        }
    }
}

/// Folded view of every pending digest for one record id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledChange {
    pub id: String,
    pub content_type: EntityType,
    /// Action of the newest digest.
    pub action: DigestAction,
    /// Scope of the newest digest.
    pub scope: DigestScope,
    /// Last-write-wins per field; a field deleted by a later digest maps to `null`.
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Contributing tokens, oldest first.
    pub tokens: Vec<UpdateToken>,
}

impl ReconciledChange {
    pub fn retires_record(&self) -> bool {
        self.action == DigestAction::Delete && self.scope == DigestScope::Record
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.tokens.first().map(|t| t.source_date_time)
    }
}
