//! File-backed stores for local runs. One JSON document per canonical entity, one JSON
//! file for sync state; every write goes to a temp file first and is renamed into place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use legisync_core::models::{CanonicalEntity, EntityKey, JurisdictionId};
use legisync_core::store::{CanonicalStore, SyncStateStore, UpsertOutcome};
use legisync_core::tracker::models::{SyncWatermark, UpdateToken, WatermarkKey};
use legisync_core::{Error as CoreError, Result as CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Percent-encode everything but `[A-Za-z0-9._-]` so ids are safe file names.
fn file_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len() + 5);
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && !out.is_empty()) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out.push_str(".json");
    out
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::backend("create dev store dir", e))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| CoreError::backend("dev store write", e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CoreError::backend("dev store rename", e))
}

#[derive(Clone)]
pub struct DevCanonicalStore {
    root: PathBuf,
    // Serializes read-compare-write so outcomes are exact under concurrent upserts.
    lock: Arc<Mutex<()>>,
}

impl DevCanonicalStore {
    #[tracing::instrument(level = "debug")]
    pub async fn new(root: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn path_for(&self, key: &EntityKey) -> CoreResult<PathBuf> {
        if key.id.trim().is_empty() {
            return Err(CoreError::InvalidInput("entity id is empty".to_string()));
        }
        Ok(self
            .root
            .join(key.jurisdiction.as_str())
            .join(key.entity_type.as_str())
            .join(file_name(&key.id)))
    }

    async fn read(&self, path: &Path) -> CoreResult<Option<CanonicalEntity>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CoreError::backend(format!("decode {}", path.display()), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::backend("dev store read", e)),
        }
    }
}

#[async_trait]
impl CanonicalStore for DevCanonicalStore {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %entity.id()))]
    async fn upsert(
        &self,
        jurisdiction: &JurisdictionId,
        entity: &CanonicalEntity,
    ) -> CoreResult<UpsertOutcome> {
        let key = entity.key(jurisdiction);
        let path = self
            .path_for(&key)
            .map_err(|e| CoreError::store_write(&key, e.to_string()))?;
        let _guard = self.lock.lock().await;
        let outcome = match self.read(&path).await? {
            None => UpsertOutcome::Created,
            Some(existing) if &existing == entity => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };
        let bytes = serde_json::to_vec_pretty(entity)
            .map_err(|e| CoreError::backend("encode canonical entity", e))?;
        write_atomic(&path, &bytes).await?;
        Ok(outcome)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn get(&self, key: &EntityKey) -> CoreResult<Option<CanonicalEntity>> {
        let path = self.path_for(key)?;
        self.read(&path).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn retire(&self, key: &EntityKey) -> CoreResult<bool> {
        let path = self.path_for(key)?;
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::backend("dev store delete", e)),
        }
    }
}

/// On-disk layout of the sync state file. Rows are keyed by `WatermarkKey`'s display form.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    watermarks: Vec<SyncWatermark>,
    /// Fingerprint → source time of the token.
    #[serde(default)]
    processed: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
    #[serde(default)]
    deferred: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Clone)]
pub struct DevSyncStateStore {
    path: PathBuf,
    state: Arc<Mutex<StateFile>>,
}

impl DevSyncStateStore {
    #[tracing::instrument(level = "debug")]
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    async fn persist(&self, state: &StateFile) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CoreError::backend("encode sync state", e))?;
        write_atomic(&self.path, &bytes).await
    }
}

#[async_trait]
impl SyncStateStore for DevSyncStateStore {
    async fn get_watermark(&self, key: &WatermarkKey) -> CoreResult<Option<SyncWatermark>> {
        let state = self.state.lock().await;
        Ok(state.watermarks.iter().find(|w| &w.key == key).cloned())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = %watermark.key, reset))]
    async fn put_watermark(&self, watermark: &SyncWatermark, reset: bool) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        match state.watermarks.iter_mut().find(|w| w.key == watermark.key) {
            Some(current) => {
                if !reset && watermark.source_date_time < current.source_date_time {
                    return Err(CoreError::Conflict(format!(
                        "watermark {} would move backwards ({} < {})",
                        watermark.key, watermark.source_date_time, current.source_date_time
                    )));
                }
                *current = watermark.clone();
            }
            None => state.watermarks.push(watermark.clone()),
        }
        self.persist(&state).await
    }

    async fn list_watermarks(&self) -> CoreResult<Vec<SyncWatermark>> {
        let mut out = self.state.lock().await.watermarks.clone();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn is_processed(&self, key: &WatermarkKey, fingerprint: &str) -> CoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .processed
            .get(&key.to_string())
            .map(|ledger| ledger.contains_key(fingerprint))
            .unwrap_or(false))
    }

    async fn mark_processed(&self, key: &WatermarkKey, tokens: &[UpdateToken]) -> CoreResult<()> {
        if let Some(t) = tokens.iter().find(|t| t.processed_date_time.is_none()) {
            return Err(CoreError::InvalidInput(format!(
                "token {} marked processed without processed_date_time",
                t.fingerprint()
            )));
        }
        if tokens.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state
            .processed
            .entry(key.to_string())
            .or_default()
            .extend(tokens.iter().map(|t| (t.fingerprint(), t.source_date_time)));
        self.persist(&state).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(key = %key))]
    async fn prune_processed(&self, key: &WatermarkKey, through: DateTime<Utc>) -> CoreResult<usize> {
        let mut state = self.state.lock().await;
        let Some(ledger) = state.processed.get_mut(&key.to_string()) else {
            return Ok(0);
        };
        let before = ledger.len();
        ledger.retain(|_, at| *at > through);
        let removed = before - ledger.len();
        if removed > 0 {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn defer(&self, key: &WatermarkKey, items: Vec<serde_json::Value>) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let parked = state.deferred.entry(key.to_string()).or_default();
        let before = parked.len();
        for item in items {
            if !parked.contains(&item) {
                parked.push(item);
            }
        }
        if parked.len() == before {
            return Ok(());
        }
        self.persist(&state).await
    }

    async fn deferred(&self, key: &WatermarkKey) -> CoreResult<Vec<serde_json::Value>> {
        let state = self.state.lock().await;
        Ok(state.deferred.get(&key.to_string()).cloned().unwrap_or_default())
    }

    async fn ack_deferred(&self, key: &WatermarkKey, items: &[serde_json::Value]) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let row = key.to_string();
        let Some(parked) = state.deferred.get_mut(&row) else {
            return Ok(());
        };
        let before = parked.len();
        parked.retain(|item| !items.contains(item));
        if parked.len() == before {
            return Ok(());
        }
        if parked.is_empty() {
            state.deferred.remove(&row);
        }
        self.persist(&state).await
    }
}

/// Stores rooted at `data_dir`: documents under `canonical/`, state in `sync_state.json`.
pub async fn build_dev_stores(
    data_dir: &Path,
) -> anyhow::Result<(Arc<DevCanonicalStore>, Arc<DevSyncStateStore>)> {
    let store = DevCanonicalStore::new(data_dir.join("canonical")).await?;
    let state = DevSyncStateStore::open(data_dir.join("sync_state.json")).await?;
    Ok((Arc::new(store), Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use legisync_core::models::{EntityType, Transcript};

    fn ny() -> JurisdictionId {
        JurisdictionId::new("ny_senate").unwrap()
    }

    fn transcript(text: &str) -> CanonicalEntity {
        CanonicalEntity::Transcript(Transcript {
            id: "2025-01-08T15:00".to_string(),
            date_time: Utc.with_ymd_and_hms(2025, 1, 8, 15, 0, 0).unwrap(),
            session_type: Some("REGULAR SESSION".to_string()),
            location: None,
            text: Some(text.to_string()),
        })
    }

    #[test]
    fn ids_become_safe_file_names() {
        assert_eq!(file_name("S1-2025"), "S1-2025.json");
        assert_eq!(file_name("S1-2025:primary:371"), "S1-2025%3Aprimary%3A371.json");
        assert_eq!(file_name("../x"), "%2E.%2Fx.json");
    }

    #[tokio::test]
    async fn canonical_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = build_dev_stores(dir.path()).await.unwrap();
        let doc = transcript("The Senate will come to order.");

        assert_eq!(store.upsert(&ny(), &doc).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.upsert(&ny(), &doc).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(
            store.upsert(&ny(), &transcript("Adjourned.")).await.unwrap(),
            UpsertOutcome::Updated
        );

        let (reopened, _) = build_dev_stores(dir.path()).await.unwrap();
        let key = EntityKey::new(ny(), EntityType::Transcript, "2025-01-08T15:00");
        assert_eq!(reopened.get(&key).await.unwrap(), Some(transcript("Adjourned.")));
        assert!(reopened.retire(&key).await.unwrap());
        assert!(!reopened.retire(&key).await.unwrap());
        assert_eq!(reopened.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sync_state_persists_and_stays_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_state.json");
        let key = WatermarkKey::new(ny(), EntityType::Bill);
        let now = Utc::now();
        let wm = |at| SyncWatermark {
            key: key.clone(),
            source_date_time: at,
            last_source_id: Some("SOBI.D250108".to_string()),
            updated_at: now,
        };

        let state = DevSyncStateStore::open(path.clone()).await.unwrap();
        state.put_watermark(&wm(now), false).await.unwrap();
        assert!(matches!(
            state.put_watermark(&wm(now - Duration::hours(2)), false).await,
            Err(CoreError::Conflict(_))
        ));
        let mut token = UpdateToken::new("S1-2025", EntityType::Bill, "SOBI.D250108", now).unwrap();
        assert!(state.mark_processed(&key, &[token.clone()]).await.is_err());
        token.processed_date_time = Some(now);
        state.mark_processed(&key, &[token.clone()]).await.unwrap();
        state
            .defer(&key, vec![serde_json::json!({"bill_id": "S1-2025"})])
            .await
            .unwrap();

        let reopened = DevSyncStateStore::open(path).await.unwrap();
        assert_eq!(reopened.list_watermarks().await.unwrap(), vec![wm(now)]);
        assert!(reopened.is_processed(&key, &token.fingerprint()).await.unwrap());
        let parked = reopened.deferred(&key).await.unwrap();
        assert_eq!(parked.len(), 1);

        // Peeking leaves the item parked; only an ack removes it, and that sticks.
        reopened.ack_deferred(&key, &parked).await.unwrap();
        assert_eq!(reopened.prune_processed(&key, now).await.unwrap(), 1);
        let again = DevSyncStateStore::open(dir.path().join("sync_state.json"))
            .await
            .unwrap();
        assert!(again.deferred(&key).await.unwrap().is_empty());
        assert!(!again.is_processed(&key, &token.fingerprint()).await.unwrap());
    }
}
