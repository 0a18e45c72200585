use chrono::Utc;
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use crate::api::envelope::ApiError;
use crate::config::SyncConfig;
use crate::geocode::Geocoder;
use crate::models::{
    CanonicalEntity, EntityKey, EntityType, JurisdictionId, Legislator, SourceRecord,
};
use crate::plugin::{JurisdictionPlugin, RecordStream};
use crate::registry::{ConfigError, InitializedPlugins, PluginRegistry};
use crate::store::{CanonicalStore, SyncStateStore, UpsertOutcome};
use crate::sync::models::{RunReport, SyncRequest, TaskStatus, TaskSummary};
use crate::sync::sponsors::{dedupe, LegislatorState, PendingLink};
use crate::tracker::engine::{ChangeTracker, CommitOutcome};
use crate::tracker::models::{DigestScope, ReconciledChange, SyncMode, WatermarkKey};
use crate::{Error, Result};

/// Drives every (jurisdiction, entity type) task of a run.
pub struct SyncOrchestrator {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn CanonicalStore>,
    tracker: ChangeTracker,
    geocoder: Option<Arc<dyn Geocoder>>,
    config: SyncConfig,
    in_flight: Arc<Mutex<HashSet<WatermarkKey>>>,
}

/// Per-jurisdiction state shared by the tasks of one run, in order.
struct JurisdictionRun<'a> {
    plugin: Arc<dyn JurisdictionPlugin>,
    jurisdiction: JurisdictionId,
    request: &'a SyncRequest,
    legislators: LegislatorState,
    legislators_written: HashSet<String>,
    /// Links from bills written by the running bill task, parked before it commits.
    links: Vec<PendingLink>,
    /// Set once a jurisdiction-wide failure makes the remaining tasks pointless.
    aborted: Option<String>,
}

/// Releases an in-flight claim on drop, including when the run is cancelled.
struct InFlightClaim {
    set: Arc<Mutex<HashSet<WatermarkKey>>>,
    key: WatermarkKey,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.key);
    }
}

impl SyncOrchestrator {
    pub fn new(
        registry: PluginRegistry,
        store: Arc<dyn CanonicalStore>,
        state: Arc<dyn SyncStateStore>,
    ) -> Self {
        let config = registry.sync_config().clone();
        Self {
            registry: Arc::new(registry),
            store,
            tracker: ChangeTracker::new(state),
            geocoder: None,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Geocode legislator office addresses before they are written.
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one synchronization to completion.
    #[tracing::instrument(level = "info", skip(self), fields(trigger = ?request.trigger))]
    pub async fn synchronize(&self, request: SyncRequest) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let InitializedPlugins {
            plugins,
            errors: mut config_errors,
        } = self.registry.get_initialized_plugins().await;

        if let Some(wanted) = &request.jurisdictions {
            for j in wanted {
                if !plugins.iter().any(|p| &p.jurisdiction() == j) {
                    config_errors.push(ConfigError {
                        plugin: j.to_string(),
                        message: format!("jurisdiction '{j}' is not available"),
                    });
                }
            }
        }

        let selected: Vec<Arc<dyn JurisdictionPlugin>> = plugins
            .into_iter()
            .filter(|p| request.wants_jurisdiction(&p.jurisdiction()))
            .collect();

        let request_ref = &request;
        let mut tasks: Vec<TaskSummary> = stream::iter(selected)
            .map(|plugin| self.run_jurisdiction(plugin, request_ref))
            .buffer_unordered(self.config.max_concurrent_jurisdictions.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        tasks.sort_by(|a, b| (&a.jurisdiction, a.entity_type).cmp(&(&b.jurisdiction, b.entity_type)));

        let report = RunReport {
            run_id,
            trigger: request.trigger,
            started_at,
            finished_at: Utc::now(),
            tasks,
            config_errors,
        };
        tracing::info!(
            %run_id,
            tasks = report.tasks.len(),
            created = report.total_created(),
            updated = report.total_updated(),
            failed = report.total_failed(),
            config_errors = report.config_errors.len(),
            "sync run finished"
        );
        Ok(report)
    }

    /// Like `synchronize`, but abandons the run on shutdown or when the configured
    /// run timeout elapses. Tasks that had not committed leave their watermarks alone.
    #[tracing::instrument(level = "info", skip(self, shutdown))]
    pub async fn synchronize_until(
        &self,
        request: SyncRequest,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        if *shutdown.borrow() {
            return Err(Error::Cancelled("shutdown requested before start".to_string()));
        }
        let deadline = self.config.run_timeout();
        let timeout = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            report = self.synchronize(request) => report,
            _ = timeout => {
                tracing::warn!(?deadline, "sync run timed out");
                Err(Error::Cancelled(format!("run exceeded {deadline:?}")))
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::warn!("sync run cancelled by shutdown signal");
                Err(Error::Cancelled("shutdown signal".to_string()))
            }
        }
    }

    fn claim(&self, key: &WatermarkKey) -> Option<InFlightClaim> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            set: self.in_flight.clone(),
            key: key.clone(),
        })
    }

    #[tracing::instrument(level = "info", skip_all, fields(jurisdiction = %plugin.jurisdiction()))]
    async fn run_jurisdiction(
        &self,
        plugin: Arc<dyn JurisdictionPlugin>,
        request: &SyncRequest,
    ) -> Vec<TaskSummary> {
        let jurisdiction = plugin.jurisdiction();
        let caps = plugin.capabilities();
        let mut run = JurisdictionRun {
            plugin,
            jurisdiction: jurisdiction.clone(),
            request,
            legislators: LegislatorState::NotRequested,
            legislators_written: HashSet::new(),
            links: Vec::new(),
            aborted: None,
        };

        let mut out = Vec::new();
        for entity_type in EntityType::SYNC_ORDER {
            if !caps.supports(entity_type) || !request.wants_entity_type(entity_type) {
                continue;
            }
            let key = WatermarkKey::new(jurisdiction.clone(), entity_type);
            let summary = if let Some(reason) = &run.aborted {
                TaskSummary::skipped(
                    jurisdiction.clone(),
                    entity_type,
                    format!("jurisdiction aborted: {reason}"),
                )
            } else {
                match self.claim(&key) {
                    None => TaskSummary::skipped(
                        jurisdiction.clone(),
                        entity_type,
                        "another task for this key is in flight",
                    ),
                    Some(_claim) => self.run_task(&mut run, entity_type).await,
                }
            };
            log_task(&summary);
            out.push(summary);
        }
        out
    }

    async fn run_task(&self, run: &mut JurisdictionRun<'_>, entity_type: EntityType) -> TaskSummary {
        let mut summary = TaskSummary::new(run.jurisdiction.clone(), entity_type);
        let res = match entity_type {
            EntityType::Sponsorship => self.run_sponsor_pass(run, &mut summary).await,
            _ => self.run_fetch_task(run, entity_type, &mut summary).await,
        };
        if let Err(e) = res {
            if aborts_jurisdiction(&e) {
                run.aborted = Some(e.to_string());
            }
            summary.fail(&e);
        }
        // A failed bill task leaves its watermark alone, but the bills it did write
        // still get their links parked.
        if let Err(e) = self.park_bill_links(run).await {
            tracing::error!(jurisdiction = %run.jurisdiction, error = %e, "failed to park sponsor links");
        }
        if entity_type == EntityType::Legislator {
            let written = std::mem::take(&mut run.legislators_written);
            run.legislators = match summary.status {
                TaskStatus::Failed => LegislatorState::Failed { written },
                _ => LegislatorState::Succeeded {
                    written,
                    failed: summary
                        .failed_ids
                        .iter()
                        .chain(&summary.malformed)
                        .cloned()
                        .collect(),
                },
            };
        }
        summary
    }

    #[tracing::instrument(level = "info", skip(self, run, summary), fields(jurisdiction = %run.jurisdiction))]
    async fn run_fetch_task(
        &self,
        run: &mut JurisdictionRun<'_>,
        entity_type: EntityType,
        summary: &mut TaskSummary,
    ) -> Result<()> {
        let key = WatermarkKey::new(run.jurisdiction.clone(), entity_type);
        let mut cycle = self.tracker.begin(key, run.request.full_resync).await?;
        self.tracker.scan(&mut cycle, run.plugin.as_ref()).await?;
        self.tracker.reconcile(&mut cycle)?;
        summary.mode = Some(cycle.mode());

        for rejected in cycle.rejected() {
            tracing::warn!(id = %rejected.digest.token.id, reason = %rejected.reason, "rejected digest");
            summary.malformed.push(rejected.digest.token.id.clone());
        }
        for entry in cycle.unreadable() {
            tracing::warn!(entry = %entry, "unreadable update feed entry");
            summary.malformed.push(entry.clone());
        }

        match cycle.mode() {
            SyncMode::Incremental { .. } => {
                let changes = cycle.changes().to_vec();
                for change in &changes {
                    self.apply_change(run, change, summary).await;
                }
            }
            mode @ (SyncMode::Full | SyncMode::Snapshot { .. }) => {
                for mut records in self.open_streams(run, entity_type, mode.since())? {
                    while let Some(item) = records.next().await {
                        let record = item?;
                        if let Some(id) = self.apply_record(run, &record, summary).await {
                            cycle.observe(&id, &record)?;
                        }
                    }
                }
            }
        }

        // Links must be durable before the bill watermark moves past their bills.
        self.park_bill_links(run).await?;

        let outcome = CommitOutcome {
            failed_ids: summary.failed_ids.iter().cloned().collect(),
        };
        let watermark = self.tracker.commit(&mut cycle, &outcome).await?;
        summary.watermark = watermark.map(|w| w.source_date_time);
        Ok(())
    }

    fn open_streams(
        &self,
        run: &JurisdictionRun<'_>,
        entity_type: EntityType,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<RecordStream>> {
        let plugin = &run.plugin;
        let year = self.config.sync_year;
        Ok(match entity_type {
            EntityType::Legislator => vec![plugin.fetch_members(since)?],
            EntityType::Committee => vec![plugin.fetch_committees()?],
            EntityType::Bill => vec![plugin.fetch_bills(since)?],
            EntityType::Calendar => vec![plugin.fetch_calendars(year)?],
            EntityType::Law => self
                .config
                .law_ids
                .iter()
                .map(|id| plugin.fetch_laws(id))
                .collect::<Result<Vec<_>>>()?,
            EntityType::Transcript => vec![plugin.fetch_transcripts(year)?],
            EntityType::Sponsorship => Vec::new(),
        })
    }

    /// Apply one reconciled feed change. Failures are recorded on the summary.
    async fn apply_change(
        &self,
        run: &mut JurisdictionRun<'_>,
        change: &ReconciledChange,
        summary: &mut TaskSummary,
    ) {
        let key = EntityKey::new(run.jurisdiction.clone(), change.content_type, &change.id);
        if change.retires_record() {
            self.retire(&key, summary).await;
            return;
        }

        if change.scope == DigestScope::Field && !change.fields.is_empty() {
            match self.store.get(&key).await {
                Ok(Some(existing)) => {
                    if let Some(entity) = overlay_fields(&existing, &change.fields) {
                        self.write_entity(run, entity, summary).await;
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%key, error = %e, "failed to read stored entity");
                    summary.record_failure(&change.id);
                    return;
                }
            }
        }

        match run.plugin.fetch_record(change.content_type, &change.id).await {
            Ok(Some(record)) => {
                self.apply_record(run, &record, summary).await;
            }
            Ok(None) => self.retire(&key, summary).await,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to fetch changed record");
                summary.record_failure(&change.id);
            }
        }
    }

    async fn retire(&self, key: &EntityKey, summary: &mut TaskSummary) {
        match self.store.retire(key).await {
            Ok(true) => summary.retired += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to retire entity");
                summary.record_failure(&key.id);
            }
        }
    }

    /// Normalize and write one record. Returns the canonical id when normalization worked,
    /// whether or not the write did.
    async fn apply_record(
        &self,
        run: &mut JurisdictionRun<'_>,
        record: &SourceRecord,
        summary: &mut TaskSummary,
    ) -> Option<String> {
        let entity = match run.plugin.normalize(record) {
            Ok(e) if e.entity_type() == record.entity_type => e,
            Ok(e) => {
                tracing::warn!(key = %record.key, produced = %e.entity_type(), "record normalized to the wrong type");
                summary.malformed.push(record.key.clone());
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %record.key, error = %e, "skipping malformed record");
                summary.malformed.push(record.key.clone());
                return None;
            }
        };
        let id = entity.id().to_string();
        self.write_entity(run, entity, summary).await;
        Some(id)
    }

    async fn write_entity(
        &self,
        run: &mut JurisdictionRun<'_>,
        mut entity: CanonicalEntity,
        summary: &mut TaskSummary,
    ) {
        if let CanonicalEntity::Legislator(legislator) = &mut entity {
            self.enrich(legislator, summary).await;
        }

        match self.upsert_with_retry(&run.jurisdiction, &entity).await {
            Ok(outcome) => {
                tally(summary, outcome);
                match &entity {
                    CanonicalEntity::Legislator(l) => {
                        run.legislators_written.insert(l.id.clone());
                    }
                    CanonicalEntity::Bill(b) => run.links.extend(PendingLink::from_bill(b)),
                    _ => {}
                }
            }
            Err(e) => {
                tracing::warn!(id = %entity.id(), error = %e, "store write failed");
                summary.record_failure(entity.id());
            }
        }
    }

    async fn enrich(&self, legislator: &mut Legislator, summary: &mut TaskSummary) {
        let Some(geocoder) = &self.geocoder else {
            return;
        };
        for office in legislator
            .offices
            .iter_mut()
            .filter(|o| o.location.is_none() && !o.address.trim().is_empty())
        {
            match geocoder.geocode(&office.address).await {
                Ok(point) => office.location = Some(point),
                Err(e) => summary.warnings.push(format!(
                    "{}: geocode '{}' failed: {e}",
                    legislator.id, office.address
                )),
            }
        }
    }

    async fn upsert_with_retry(
        &self,
        jurisdiction: &JurisdictionId,
        entity: &CanonicalEntity,
    ) -> Result<UpsertOutcome> {
        let attempts = self.config.store_write_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.upsert(jurisdiction, entity).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < attempts => {
                    tracing::debug!(id = %entity.id(), attempt, error = %e, "retrying store write");
                }
                Err(e @ Error::StoreWrite { .. }) => return Err(e),
                Err(e) => return Err(Error::store_write(entity.key(jurisdiction), e.to_string())),
            }
        }
    }

    /// Resolve every parked link. A link leaves the parked set only once it is written,
    /// so a run that stops half way leaves the rest for the next one.
    #[tracing::instrument(level = "info", skip(self, run, summary), fields(jurisdiction = %run.jurisdiction))]
    async fn run_sponsor_pass(
        &self,
        run: &mut JurisdictionRun<'_>,
        summary: &mut TaskSummary,
    ) -> Result<()> {
        summary.mode = Some(SyncMode::Full);
        let key = WatermarkKey::new(run.jurisdiction.clone(), EntityType::Sponsorship);
        let state = self.tracker.state();

        let mut links = Vec::new();
        let mut unreadable = Vec::new();
        for raw in state.deferred(&key).await? {
            match serde_json::from_value::<PendingLink>(raw.clone()) {
                Ok(link) => links.push((raw, link)),
                Err(e) => {
                    summary
                        .warnings
                        .push(format!("dropping unreadable deferred link {raw}: {e}"));
                    unreadable.push(raw);
                }
            }
        }
        if !unreadable.is_empty() {
            state.ack_deferred(&key, &unreadable).await?;
        }

        let total = links.len();
        let mut seen = HashSet::new();
        let mut waiting = 0usize;
        for (raw, link) in links {
            let entity = CanonicalEntity::Sponsorship(link.sponsorship());
            if !seen.insert(entity.id().to_string()) {
                self.ack_link(&key, raw).await;
                continue;
            }
            let known = match run
                .legislators
                .is_known(self.store.as_ref(), &run.jurisdiction, &link.sponsor.legislator_id)
                .await
            {
                Ok(known) => known,
                Err(e) => {
                    tracing::warn!(id = %entity.id(), error = %e, "legislator lookup failed");
                    false
                }
            };
            if !known {
                tracing::debug!(id = %entity.id(), legislator = %link.sponsor.legislator_id, "deferring sponsor link");
                summary.record_failure(entity.id());
                waiting += 1;
                continue;
            }
            match self.upsert_with_retry(&run.jurisdiction, &entity).await {
                Ok(outcome) => {
                    tally(summary, outcome);
                    self.ack_link(&key, raw).await;
                }
                Err(e) => {
                    tracing::warn!(id = %entity.id(), error = %e, "sponsor link write failed");
                    summary.record_failure(entity.id());
                    waiting += 1;
                }
            }
        }

        tracing::debug!(total, waiting, "sponsor pass resolved");
        Ok(())
    }

    /// Drop a resolved link from the parked set. A failed ack only means the link is
    /// written again next run.
    async fn ack_link(&self, key: &WatermarkKey, raw: serde_json::Value) {
        if let Err(e) = self.tracker.state().ack_deferred(key, &[raw]).await {
            tracing::warn!(%key, error = %e, "failed to clear resolved sponsor link");
        }
    }

    /// Park the links collected by the bill task so far.
    async fn park_bill_links(&self, run: &mut JurisdictionRun<'_>) -> Result<()> {
        if run.links.is_empty() {
            return Ok(());
        }
        let links = dedupe(std::mem::take(&mut run.links));
        let values = links
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::backend("serialize sponsor links", e))?;
        let key = WatermarkKey::new(run.jurisdiction.clone(), EntityType::Sponsorship);
        if let Err(e) = self.tracker.state().defer(&key, values).await {
            run.links = links;
            return Err(e);
        }
        Ok(())
    }
}

fn tally(summary: &mut TaskSummary, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Created => summary.created += 1,
        UpsertOutcome::Updated => summary.updated += 1,
        UpsertOutcome::Unchanged => summary.unchanged += 1,
    }
}

/// Errors after which no other task of the same jurisdiction can succeed this run.
fn aborts_jurisdiction(e: &Error) -> bool {
    matches!(
        e,
        Error::NotInitialized(_)
            | Error::Config(_)
            | Error::Upstream(ApiError {
                code: 401 | 403,
                ..
            })
    )
}

/// Apply folded field values onto a stored entity. `None` when a field is unknown to the
/// entity or the result no longer deserializes, in which case the caller refetches.
fn overlay_fields(
    existing: &CanonicalEntity,
    fields: &BTreeMap<String, serde_json::Value>,
) -> Option<CanonicalEntity> {
    let mut value = serde_json::to_value(existing).ok()?;
    let obj = value.as_object_mut()?;
    for (name, v) in fields {
        if name == "id" || name == "entity_type" {
            continue;
        }
        if !obj.contains_key(name) {
            return None;
        }
        obj.insert(name.clone(), v.clone());
    }
    let updated: CanonicalEntity = serde_json::from_value(value).ok()?;
    (updated.id() == existing.id()).then_some(updated)
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without signalling: never fires.
            std::future::pending::<()>().await;
        }
    }
}

fn log_task(summary: &TaskSummary) {
    match summary.status {
        TaskStatus::Failed => tracing::error!(
            jurisdiction = %summary.jurisdiction,
            entity_type = %summary.entity_type,
            failed = summary.failed,
            error = summary.error.as_deref().unwrap_or(""),
            "sync task failed"
        ),
        _ => tracing::info!(
            jurisdiction = %summary.jurisdiction,
            entity_type = %summary.entity_type,
            status = ?summary.status,
            mode = ?summary.mode,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            retired = summary.retired,
            failed = summary.failed,
            malformed = summary.malformed.len(),
            warnings = summary.warnings.len(),
            watermark = ?summary.watermark,
            "sync task finished"
        ),
    }
}
