use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::models::{EntityType, SourceRecord};
use crate::plugin::JurisdictionPlugin;
use crate::store::SyncStateStore;
use crate::tracker::models::{
    DigestAction, DigestScope, DigestUpdate, ReconciledChange, SyncMode, SyncWatermark,
    TrackerPhase, UpdateToken, WatermarkKey,
};
use crate::{Error, Result};

/// A digest the tracker refused to reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDigest {
    pub digest: DigestUpdate,
    pub reason: String,
}

/// State of one (jurisdiction, entity type) sync: Idle → Scanning → Reconciling → Committed.
#[derive(Debug)]
pub struct SyncCycle {
    key: WatermarkKey,
    phase: TrackerPhase,
    mode: SyncMode,
    full_resync: bool,
    watermark: Option<SyncWatermark>,
    started_at: DateTime<Utc>,
    /// Feed digests, ascending by (source_date_time, source_id).
    digests: Vec<DigestUpdate>,
    changes: Vec<ReconciledChange>,
    rejected: Vec<RejectedDigest>,
    /// Feed entries the plugin could not tie to a record.
    unreadable: Vec<String>,
    /// Tokens synthesized from fetched records in full/snapshot mode.
    observed: Vec<UpdateToken>,
}

impl SyncCycle {
    pub fn key(&self) -> &WatermarkKey {
        &self.key
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn watermark(&self) -> Option<&SyncWatermark> {
        self.watermark.as_ref()
    }

    pub fn changes(&self) -> &[ReconciledChange] {
        &self.changes
    }

    pub fn rejected(&self) -> &[RejectedDigest] {
        &self.rejected
    }

    pub fn unreadable(&self) -> &[String] {
        &self.unreadable
    }

    fn expect_phase(&self, expected: TrackerPhase, op: &str) -> Result<()> {
        if self.phase != expected {
            return Err(Error::Conflict(format!(
                "tracker {} cannot {op} in phase {:?} (expected {:?})",
                self.key, self.phase, expected
            )));
        }
        Ok(())
    }

    /// Record a record fetched in full/snapshot mode as a synthetic token.
    pub fn observe(&mut self, canonical_id: &str, record: &SourceRecord) -> Result<()> {
        self.expect_phase(TrackerPhase::Reconciling, "observe records")?;
        let at = record.source_date_time.unwrap_or(self.started_at);
        let token = UpdateToken::new(
            canonical_id,
            self.key.entity_type,
            format!("fetch:{}", record.key),
            at,
        )?;
        self.observed.push(token);
        Ok(())
    }
}

/// What the orchestrator reports back when it commits a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Canonical ids whose write failed in this cycle.
    pub failed_ids: HashSet<String>,
}

/// Incremental change detection over a plugin's update feed.
#[derive(Clone)]
pub struct ChangeTracker {
    state: Arc<dyn SyncStateStore>,
}

impl ChangeTracker {
    pub fn new(state: Arc<dyn SyncStateStore>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<dyn SyncStateStore> {
        &self.state
    }

    /// Start a cycle. Without a prior watermark (or on explicit full resync) the mode is `Full`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn begin(&self, key: WatermarkKey, full_resync: bool) -> Result<SyncCycle> {
        let watermark = self.state.get_watermark(&key).await?;
        let mode = match (&watermark, full_resync) {
            (Some(wm), false) => SyncMode::Incremental {
                since: wm.source_date_time,
            },
            _ => SyncMode::Full,
        };
        Ok(SyncCycle {
            key,
            phase: TrackerPhase::Idle,
            mode,
            full_resync,
            watermark,
            started_at: Utc::now(),
            digests: Vec::new(),
            changes: Vec::new(),
            rejected: Vec::new(),
            unreadable: Vec::new(),
            observed: Vec::new(),
        })
    }

    /// Collect unprocessed change events newer than the watermark.
    ///
    /// Entity types without an update feed degrade to `Snapshot` mode.
    #[tracing::instrument(level = "debug", skip(self, cycle, plugin), fields(key = %cycle.key))]
    pub async fn scan(&self, cycle: &mut SyncCycle, plugin: &dyn JurisdictionPlugin) -> Result<()> {
        cycle.expect_phase(TrackerPhase::Idle, "scan")?;
        cycle.phase = TrackerPhase::Scanning;

        let SyncMode::Incremental { since } = cycle.mode else {
            return Ok(());
        };

        let entity_type = cycle.key.entity_type;
        let feed = if plugin.capabilities().has_update_feed(entity_type) {
            plugin.fetch_updates(entity_type, since).await?
        } else {
            None
        };
        let Some(feed) = feed else {
            cycle.mode = SyncMode::Snapshot { since };
            return Ok(());
        };

        cycle.unreadable = feed.unreadable;
        let mut digests = Vec::with_capacity(feed.digests.len());
        for digest in feed.digests {
            if digest.token.source_date_time <= since {
                continue;
            }
            if digest.token.content_type != entity_type {
                cycle.rejected.push(RejectedDigest {
                    reason: format!(
                        "content type {} does not match {entity_type}",
                        digest.token.content_type
                    ),
                    digest,
                });
                continue;
            }
            if let Err(e) = digest.validate() {
                cycle.rejected.push(RejectedDigest {
                    reason: e.to_string(),
                    digest,
                });
                continue;
            }
            if self
                .state
                .is_processed(&cycle.key, &digest.token.fingerprint())
                .await?
            {
                continue;
            }
            digests.push(digest);
        }
        sort_digests(&mut digests);

        tracing::debug!(
            pending = digests.len(),
            rejected = cycle.rejected.len(),
            unreadable = cycle.unreadable.len(),
            %since,
            "scanned update feed"
        );
        cycle.digests = digests;
        Ok(())
    }

    /// Fold scanned digests into one change per record id.
    #[tracing::instrument(level = "debug", skip(self, cycle), fields(key = %cycle.key))]
    pub fn reconcile(&self, cycle: &mut SyncCycle) -> Result<()> {
        cycle.expect_phase(TrackerPhase::Scanning, "reconcile")?;
        cycle.changes = fold_digests(&cycle.digests);
        cycle.phase = TrackerPhase::Reconciling;
        Ok(())
    }

    /// Advance the watermark over what was durably written and retire the tokens.
    ///
    /// With failures, the watermark stops before the earliest token of any failed id;
    /// tokens of successful ids are still marked processed so a re-run only retries
    /// the failures.
    #[tracing::instrument(level = "debug", skip(self, cycle, outcome), fields(key = %cycle.key))]
    pub async fn commit(
        &self,
        cycle: &mut SyncCycle,
        outcome: &CommitOutcome,
    ) -> Result<Option<SyncWatermark>> {
        cycle.expect_phase(TrackerPhase::Reconciling, "commit")?;

        let feed_tokens = cycle.digests.iter().map(|d| &d.token);
        let rejected_tokens = cycle.rejected.iter().map(|r| &r.digest.token);
        let mut all: Vec<&UpdateToken> = feed_tokens
            .clone()
            .chain(rejected_tokens.clone())
            .chain(cycle.observed.iter())
            .collect();
        all.sort_by(|a, b| {
            (a.source_date_time, &a.source_id, &a.id).cmp(&(b.source_date_time, &b.source_id, &b.id))
        });

        let barrier = all
            .iter()
            .filter(|t| outcome.failed_ids.contains(&t.id))
            .map(|t| t.source_date_time)
            .min();

        let newest = all
            .iter()
            .filter(|t| !outcome.failed_ids.contains(&t.id))
            .filter(|t| barrier.map(|b| t.source_date_time < b).unwrap_or(true))
            .max_by_key(|t| t.source_date_time)
            .copied();

        let mut committed = cycle.watermark.clone();
        if let Some(token) = newest {
            let advances = cycle.full_resync
                || cycle
                    .watermark
                    .as_ref()
                    .map(|wm| token.source_date_time > wm.source_date_time)
                    .unwrap_or(true);
            if advances {
                let wm = SyncWatermark {
                    key: cycle.key.clone(),
                    source_date_time: token.source_date_time,
                    last_source_id: Some(token.source_id.clone()),
                    updated_at: Utc::now(),
                };
                self.state.put_watermark(&wm, cycle.full_resync).await?;
                committed = Some(wm);
            }
        }

        let processed_at = Utc::now();
        let retired: Vec<UpdateToken> = feed_tokens
            .chain(rejected_tokens)
            .filter(|t| !outcome.failed_ids.contains(&t.id))
            .map(|t| UpdateToken {
                processed_date_time: Some(processed_at),
                ..t.clone()
            })
            .collect();
        self.state.mark_processed(&cycle.key, &retired).await?;

        // The scan skips everything at or below the watermark, so the ledger only
        // needs tokens above it.
        let pruned = match &committed {
            Some(wm) => {
                self.state
                    .prune_processed(&cycle.key, wm.source_date_time)
                    .await?
            }
            None => 0,
        };

        cycle.phase = TrackerPhase::Committed;
        tracing::debug!(
            retired = retired.len(),
            pruned,
            watermark = ?committed.as_ref().map(|w| w.source_date_time),
            "tracker committed"
        );
        Ok(committed)
    }
}

/// Ascending by source time; ties broken by source id, then record id.
pub fn sort_digests(digests: &mut [DigestUpdate]) {
    digests.sort_by(|a, b| {
        (
            a.token.source_date_time,
            &a.token.source_id,
            &a.token.id,
        )
            .cmp(&(b.token.source_date_time, &b.token.source_id, &b.token.id))
    });
}

/// Group sorted digests by record id and fold their fields, later values winning.
pub fn fold_digests(digests: &[DigestUpdate]) -> Vec<ReconciledChange> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: BTreeMap<String, ReconciledChange> = BTreeMap::new();

    for d in digests {
        let change = by_id.entry(d.token.id.clone()).or_insert_with(|| {
            order.push(d.token.id.clone());
            ReconciledChange {
                id: d.token.id.clone(),
                content_type: d.token.content_type,
                action: d.action,
                scope: d.scope,
                fields: BTreeMap::new(),
                tokens: Vec::new(),
            }
        });

        match (d.action, d.scope) {
            (DigestAction::Delete, DigestScope::Field) => {
                for k in d.fields.keys() {
                    change.fields.insert(k.clone(), serde_json::Value::Null);
                }
            }
            (DigestAction::Delete, DigestScope::Record) => {
                change.fields.clear();
            }
            _ => {
                for (k, v) in &d.fields {
                    change.fields.insert(k.clone(), v.clone());
                }
            }
        }
        change.action = d.action;
        change.scope = d.scope;
        change.tokens.push(d.token.clone());
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Entity types that are always swept in full, ignoring any watermark.
pub fn is_derived(entity_type: EntityType) -> bool {
    entity_type == EntityType::Sponsorship
}
