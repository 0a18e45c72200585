//! Storage seams used by the sync engine.
//!
//! The engine depends on nothing beyond keyed upsert/read of canonical documents and
//! per-(jurisdiction, entity type) sync state. Both must make a single-key write atomic.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CanonicalEntity, EntityKey, JurisdictionId};
use crate::tracker::models::{SyncWatermark, UpdateToken, WatermarkKey};
use crate::Result;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// The stored document already equals the new one.
    Unchanged,
}

/// Document sink for canonical entities, keyed by `EntityKey`.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Insert or replace. Idempotent: writing the same entity twice yields `Unchanged`.
    async fn upsert(
        &self,
        jurisdiction: &JurisdictionId,
        entity: &CanonicalEntity,
    ) -> Result<UpsertOutcome>;

    async fn get(&self, key: &EntityKey) -> Result<Option<CanonicalEntity>>;

    async fn contains(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove an entity the upstream deleted. Returns whether it existed.
    async fn retire(&self, key: &EntityKey) -> Result<bool>;
}

/// Durable sync cursors, the processed-token ledger, and deferred work.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_watermark(&self, key: &WatermarkKey) -> Result<Option<SyncWatermark>>;

    /// Store a watermark. Moving it backwards fails with `Conflict` unless `reset`
    /// (explicit full resync).
    async fn put_watermark(&self, watermark: &SyncWatermark, reset: bool) -> Result<()>;

    async fn list_watermarks(&self) -> Result<Vec<SyncWatermark>>;

    async fn is_processed(&self, key: &WatermarkKey, fingerprint: &str) -> Result<bool>;

    async fn mark_processed(&self, key: &WatermarkKey, tokens: &[UpdateToken]) -> Result<()>;

    /// Forget processed tokens with `source_date_time <= through`. The scan never looks
    /// at tokens at or below the watermark, so they no longer need a ledger entry.
    /// Returns how many entries were removed.
    async fn prune_processed(&self, key: &WatermarkKey, through: DateTime<Utc>) -> Result<usize>;

    /// Park work that has not completed yet (e.g. unresolved sponsor links). Items equal
    /// to one already parked under `key` are not added twice.
    async fn defer(&self, key: &WatermarkKey, items: Vec<serde_json::Value>) -> Result<()>;

    /// Everything parked under `key`, oldest first. Nothing is removed.
    async fn deferred(&self, key: &WatermarkKey) -> Result<Vec<serde_json::Value>>;

    /// Remove parked items once their work is done.
    async fn ack_deferred(&self, key: &WatermarkKey, items: &[serde_json::Value]) -> Result<()>;
}
