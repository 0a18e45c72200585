use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{CanonicalStore, SyncStateStore, UpsertOutcome};
use crate::models::{CanonicalEntity, EntityKey, EntityType, JurisdictionId};
use crate::tracker::models::{SyncWatermark, UpdateToken, WatermarkKey};
use crate::{Error, Result};

/// In-memory canonical store for local development and tests.
#[derive(Clone, Default)]
pub struct MemoryCanonicalStore {
    docs: Arc<RwLock<HashMap<EntityKey, CanonicalEntity>>>,
}

impl MemoryCanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored entity of one type (primarily for tests).
    pub async fn all_of(
        &self,
        jurisdiction: &JurisdictionId,
        entity_type: EntityType,
    ) -> Vec<CanonicalEntity> {
        let docs = self.docs.read().await;
        let mut out: Vec<CanonicalEntity> = docs
            .iter()
            .filter(|(k, _)| &k.jurisdiction == jurisdiction && k.entity_type == entity_type)
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }
}

#[async_trait]
impl CanonicalStore for MemoryCanonicalStore {
    async fn upsert(
        &self,
        jurisdiction: &JurisdictionId,
        entity: &CanonicalEntity,
    ) -> Result<UpsertOutcome> {
        if entity.id().trim().is_empty() {
            return Err(Error::store_write(
                entity.key(jurisdiction),
                "entity id is empty",
            ));
        }
        let key = entity.key(jurisdiction);
        let mut docs = self.docs.write().await;
        let outcome = match docs.get(&key) {
            None => UpsertOutcome::Created,
            Some(existing) if existing == entity => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        };
        if outcome != UpsertOutcome::Unchanged {
            docs.insert(key, entity.clone());
        }
        Ok(outcome)
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<CanonicalEntity>> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn retire(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.docs.write().await.remove(key).is_some())
    }
}

#[derive(Default)]
struct SyncStateInner {
    watermarks: HashMap<WatermarkKey, SyncWatermark>,
    /// Fingerprint → source time of the token, per key.
    processed: HashMap<WatermarkKey, HashMap<String, DateTime<Utc>>>,
    deferred: HashMap<WatermarkKey, Vec<serde_json::Value>>,
}

/// In-memory sync state store. One lock covers all rows, so each write is atomic.
#[derive(Clone, Default)]
pub struct MemorySyncStateStore {
    inner: Arc<Mutex<SyncStateInner>>,
}

impl MemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn processed_count(&self, key: &WatermarkKey) -> usize {
        self.inner
            .lock()
            .await
            .processed
            .get(key)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncStateStore {
    async fn get_watermark(&self, key: &WatermarkKey) -> Result<Option<SyncWatermark>> {
        Ok(self.inner.lock().await.watermarks.get(key).cloned())
    }

    async fn put_watermark(&self, watermark: &SyncWatermark, reset: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.watermarks.get(&watermark.key) {
            if !reset && watermark.source_date_time < current.source_date_time {
                return Err(Error::Conflict(format!(
                    "watermark {} would move backwards ({} < {})",
                    watermark.key, watermark.source_date_time, current.source_date_time
                )));
            }
        }
        inner
            .watermarks
            .insert(watermark.key.clone(), watermark.clone());
        Ok(())
    }

    async fn list_watermarks(&self) -> Result<Vec<SyncWatermark>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<SyncWatermark> = inner.watermarks.values().cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn is_processed(&self, key: &WatermarkKey, fingerprint: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .processed
            .get(key)
            .map(|ledger| ledger.contains_key(fingerprint))
            .unwrap_or(false))
    }

    async fn mark_processed(&self, key: &WatermarkKey, tokens: &[UpdateToken]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(t) = tokens.iter().find(|t| t.processed_date_time.is_none()) {
            return Err(Error::InvalidInput(format!(
                "token {} marked processed without processed_date_time",
                t.fingerprint()
            )));
        }
        let ledger = inner.processed.entry(key.clone()).or_default();
        for t in tokens {
            ledger.insert(t.fingerprint(), t.source_date_time);
        }
        Ok(())
    }

    async fn prune_processed(&self, key: &WatermarkKey, through: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(ledger) = inner.processed.get_mut(key) else {
            return Ok(0);
        };
        let before = ledger.len();
        ledger.retain(|_, at| *at > through);
        Ok(before - ledger.len())
    }

    async fn defer(&self, key: &WatermarkKey, items: Vec<serde_json::Value>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        let parked = inner.deferred.entry(key.clone()).or_default();
        for item in items {
            if !parked.contains(&item) {
                parked.push(item);
            }
        }
        Ok(())
    }

    async fn deferred(&self, key: &WatermarkKey) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .inner
            .lock()
            .await
            .deferred
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn ack_deferred(&self, key: &WatermarkKey, items: &[serde_json::Value]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(parked) = inner.deferred.get_mut(key) {
            parked.retain(|item| !items.contains(item));
            if parked.is_empty() {
                inner.deferred.remove(key);
            }
        }
        Ok(())
    }
}
