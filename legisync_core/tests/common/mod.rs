#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream;
use legisync_core::api::transport::{HttpTransport, TransportResponse};
use legisync_core::config::SyncConfig;
use legisync_core::models::{
    Bill, CanonicalEntity, Chamber, EntityKey, EntityType, JurisdictionId, Legislator, Office,
    SourceRecord, SponsorRef, SponsorRole,
};
use legisync_core::plugin::{Capabilities, InitCell, JurisdictionPlugin, PluginConfig, RecordStream};
use legisync_core::registry::{PluginEntry, PluginRegistry, StaticCredentialResolver};
use legisync_core::store::memory::MemoryCanonicalStore;
use legisync_core::store::{CanonicalStore, UpsertOutcome};
use legisync_core::tracker::models::{DigestUpdate, UpdateFeed};
use legisync_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

pub fn jid(s: &str) -> JurisdictionId {
    JurisdictionId::new(s).unwrap()
}

pub fn member(id: &str, when: DateTime<Utc>) -> SourceRecord {
    SourceRecord::new(
        EntityType::Legislator,
        id,
        Some(when),
        json!({"memberId": id, "fullName": format!("Member {id}")}),
    )
    .unwrap()
}

pub fn bill(print_no: &str, sponsors: &[&str], when: DateTime<Utc>) -> SourceRecord {
    SourceRecord::new(
        EntityType::Bill,
        print_no,
        Some(when),
        json!({"printNo": print_no, "title": format!("Bill {print_no}"), "sponsors": sponsors}),
    )
    .unwrap()
}

/// What the fake upstream currently holds. Tests mutate it between runs.
#[derive(Default)]
pub struct FakeUpstream {
    pub members: Vec<SourceRecord>,
    pub bills: Vec<SourceRecord>,
    /// Update feed per entity type. Types without an entry have no feed.
    pub feeds: HashMap<EntityType, Vec<DigestUpdate>>,
    /// Feed entries the plugin cannot tie to a record, returned with every feed.
    pub unreadable: Vec<String>,
    pub fail_members: bool,
    /// Bills stream never finishes.
    pub hang_bills: bool,
    pub calls: Vec<(EntityType, Option<DateTime<Utc>>)>,
}

/// Minimal plugin over an in-memory upstream. Bills map to `{printNo}-2025`.
pub struct FakePlugin {
    jurisdiction: JurisdictionId,
    init: InitCell<PluginConfig>,
    pub upstream: Arc<Mutex<FakeUpstream>>,
}

impl FakePlugin {
    pub fn new(jurisdiction: &str, upstream: Arc<Mutex<FakeUpstream>>) -> Self {
        Self {
            jurisdiction: jid(jurisdiction),
            init: InitCell::new("fake"),
            upstream,
        }
    }

    fn since_filtered(records: &[SourceRecord], since: Option<DateTime<Utc>>) -> Vec<Result<SourceRecord>> {
        records
            .iter()
            .filter(|r| match (since, r.source_date_time) {
                (Some(s), Some(t)) => t > s,
                _ => true,
            })
            .cloned()
            .map(Ok)
            .collect()
    }
}

#[async_trait]
impl JurisdictionPlugin for FakePlugin {
    fn jurisdiction(&self) -> JurisdictionId {
        self.jurisdiction.clone()
    }

    fn capabilities(&self) -> Capabilities {
        let up = self.upstream.lock().unwrap();
        Capabilities {
            entity_types: vec![EntityType::Legislator, EntityType::Bill],
            update_feeds: up.feeds.keys().copied().collect(),
        }
    }

    fn initialize(&self, config: PluginConfig) -> Result<()> {
        self.init.set(config)
    }

    fn fetch_bills(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream> {
        self.init.get()?;
        let mut up = self.upstream.lock().unwrap();
        up.calls.push((EntityType::Bill, since));
        if up.hang_bills {
            return Ok(Box::pin(stream::pending()));
        }
        Ok(Box::pin(stream::iter(Self::since_filtered(&up.bills, since))))
    }

    fn fetch_members(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream> {
        self.init.get()?;
        let mut up = self.upstream.lock().unwrap();
        up.calls.push((EntityType::Legislator, since));
        let mut items = Self::since_filtered(&up.members, since);
        if up.fail_members {
            items.push(Err(Error::transport("members", "connection reset")));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn fetch_updates(
        &self,
        entity_type: EntityType,
        since: DateTime<Utc>,
    ) -> Result<Option<UpdateFeed>> {
        self.init.get()?;
        let up = self.upstream.lock().unwrap();
        Ok(up.feeds.get(&entity_type).map(|feed| UpdateFeed {
            digests: feed
                .iter()
                .filter(|d| d.token.source_date_time > since)
                .cloned()
                .collect(),
            unreadable: up.unreadable.clone(),
        }))
    }

    async fn fetch_record(&self, entity_type: EntityType, id: &str) -> Result<Option<SourceRecord>> {
        self.init.get()?;
        let up = self.upstream.lock().unwrap();
        let pool = match entity_type {
            EntityType::Bill => &up.bills,
            EntityType::Legislator => &up.members,
            _ => return Ok(None),
        };
        Ok(pool
            .iter()
            .find(|r| canonical_id(r).as_deref() == Some(id))
            .cloned())
    }

    fn normalize(&self, record: &SourceRecord) -> Result<CanonicalEntity> {
        let p = &record.payload;
        let str_field = |name: &str| {
            p.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::malformed(record.entity_type, &record.key, format!("missing {name}")))
        };
        match record.entity_type {
            EntityType::Legislator => Ok(CanonicalEntity::Legislator(Legislator {
                id: str_field("memberId")?,
                full_name: str_field("fullName")?,
                short_name: String::new(),
                chamber: Chamber::Upper,
                district: None,
                session_year: 2025,
                incumbent: true,
                email: None,
                offices: p
                    .get("offices")
                    .and_then(Value::as_array)
                    .map(|offices| {
                        offices
                            .iter()
                            .filter_map(|o| {
                                Some(Office {
                                    label: o.get("label")?.as_str()?.to_string(),
                                    address: o.get("address")?.as_str()?.to_string(),
                                    location: None,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })),
            EntityType::Bill => {
                let print_no = str_field("printNo")?;
                let sponsors = p
                    .get("sponsors")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(|id| SponsorRef {
                                legislator_id: id.to_string(),
                                role: SponsorRole::Primary,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(CanonicalEntity::Bill(Bill {
                    id: format!("{print_no}-2025"),
                    session_year: 2025,
                    print_no,
                    title: str_field("title")?,
                    summary: p.get("summary").and_then(Value::as_str).map(str::to_string),
                    status: p.get("status").and_then(Value::as_str).map(str::to_string),
                    active_version: String::new(),
                    published_at: None,
                    sponsors,
                }))
            }
            other => Err(Error::malformed(other, &record.key, "unsupported")),
        }
    }
}

fn canonical_id(r: &SourceRecord) -> Option<String> {
    match r.entity_type {
        EntityType::Bill => r
            .payload
            .get("printNo")
            .and_then(Value::as_str)
            .map(|p| format!("{p}-2025")),
        _ => r.payload.get("memberId").and_then(Value::as_str).map(str::to_string),
    }
}

/// Canonical store whose writes for some ids always fail, and whose sponsorship
/// writes can be made to never return.
pub struct FlakyStore {
    pub inner: MemoryCanonicalStore,
    pub failing: Mutex<HashSet<String>>,
    pub attempts: Mutex<HashMap<String, u32>>,
    pub hang_links: Mutex<bool>,
}

impl FlakyStore {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: MemoryCanonicalStore::new(),
            failing: Mutex::new(failing.iter().map(|s| s.to_string()).collect()),
            attempts: Mutex::new(HashMap::new()),
            hang_links: Mutex::new(false),
        }
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.hang_links.lock().unwrap() = false;
    }
}

#[async_trait]
impl CanonicalStore for FlakyStore {
    async fn upsert(&self, jurisdiction: &JurisdictionId, entity: &CanonicalEntity) -> Result<UpsertOutcome> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(entity.id().to_string())
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(entity.id()) {
            return Err(Error::BackendMessage("disk full".to_string()));
        }
        let hang = *self.hang_links.lock().unwrap();
        if hang && entity.entity_type() == EntityType::Sponsorship {
            std::future::pending::<()>().await;
        }
        self.inner.upsert(jurisdiction, entity).await
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<CanonicalEntity>> {
        self.inner.get(key).await
    }

    async fn retire(&self, key: &EntityKey) -> Result<bool> {
        self.inner.retire(key).await
    }
}

/// Registry whose factories build a fresh `FakePlugin` per run over a shared upstream.
pub fn registry_with(
    jurisdictions: Vec<(&'static str, Arc<Mutex<FakeUpstream>>)>,
    config: SyncConfig,
) -> PluginRegistry {
    let resolver = StaticCredentialResolver::new().with("FAKE_KEY", "k");
    let mut registry = PluginRegistry::new(Arc::new(resolver), config);
    for (name, upstream) in jurisdictions {
        registry
            .register(PluginEntry {
                name: name.to_string(),
                factory: Arc::new(move |_cfg: &SyncConfig| {
                    Ok(Arc::new(FakePlugin::new(name, upstream.clone())) as Arc<dyn JurisdictionPlugin>)
                }),
                credential_ref: Some("env:FAKE_KEY".to_string()),
                base_url: "https://fake.test/api".to_string(),
            })
            .unwrap();
    }
    registry
}

/// One scripted HTTP exchange log entry.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

type Responder = Box<dyn Fn(&Request) -> Result<TransportResponse> + Send + Sync>;

/// Transport that answers from a closure and records every request.
pub struct ScriptedTransport {
    responder: Responder,
    pub requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&Request) -> Result<TransportResponse> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<TransportResponse> {
        let req = Request {
            url: url.to_string(),
            query: query.to_vec(),
        };
        self.requests.lock().unwrap().push(req.clone());
        (self.responder)(&req)
    }
}

pub fn ok(body: Value) -> Result<TransportResponse> {
    Ok(TransportResponse {
        status: 200,
        retry_after: None,
        body: Some(body),
    })
}
