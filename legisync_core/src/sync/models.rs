use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntityType, JurisdictionId};
use crate::registry::ConfigError;
use crate::tracker::models::SyncMode;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Recurring invocation with no payload.
    Scheduled,
    /// Administrative invocation, possibly narrowed.
    Manual,
}

/// What one `synchronize` call should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub trigger: SyncTrigger,
    /// `None` means every configured jurisdiction.
    #[serde(default)]
    pub jurisdictions: Option<Vec<JurisdictionId>>,
    /// `None` means every entity type the plugin supports.
    #[serde(default)]
    pub entity_types: Option<Vec<EntityType>>,
    /// Ignore watermarks and refetch everything; watermarks may move backwards.
    #[serde(default)]
    pub full_resync: bool,
}

impl SyncRequest {
    pub fn scheduled() -> Self {
        Self {
            trigger: SyncTrigger::Scheduled,
            jurisdictions: None,
            entity_types: None,
            full_resync: false,
        }
    }

    pub fn manual() -> Self {
        Self {
            trigger: SyncTrigger::Manual,
            ..Self::scheduled()
        }
    }

    pub fn with_jurisdictions(mut self, jurisdictions: Vec<JurisdictionId>) -> Self {
        self.jurisdictions = Some(jurisdictions);
        self
    }

    pub fn with_entity_types(mut self, entity_types: Vec<EntityType>) -> Self {
        self.entity_types = Some(entity_types);
        self
    }

    pub fn with_full_resync(mut self) -> Self {
        self.full_resync = true;
        self
    }

    pub fn wants_jurisdiction(&self, jurisdiction: &JurisdictionId) -> bool {
        self.jurisdictions
            .as_ref()
            .map(|js| js.contains(jurisdiction))
            .unwrap_or(true)
    }

    pub fn wants_entity_type(&self, entity_type: EntityType) -> bool {
        self.entity_types
            .as_ref()
            .map(|ts| ts.contains(&entity_type))
            .unwrap_or(true)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one (jurisdiction, entity type) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub jurisdiction: JurisdictionId,
    pub entity_type: EntityType,
    pub mode: Option<SyncMode>,
    pub status: TaskStatus,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub retired: u64,
    pub failed: u64,
    pub failed_ids: Vec<String>,
    /// Upstream keys of records that could not be normalized.
    pub malformed: Vec<String>,
    /// Contained per-record problems (e.g. geocoding misses).
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// Watermark after the task, if any.
    pub watermark: Option<DateTime<Utc>>,
}

impl TaskSummary {
    pub fn new(jurisdiction: JurisdictionId, entity_type: EntityType) -> Self {
        Self {
            jurisdiction,
            entity_type,
            mode: None,
            status: TaskStatus::Succeeded,
            created: 0,
            updated: 0,
            unchanged: 0,
            retired: 0,
            failed: 0,
            failed_ids: Vec::new(),
            malformed: Vec::new(),
            warnings: Vec::new(),
            error: None,
            watermark: None,
        }
    }

    pub fn skipped(
        jurisdiction: JurisdictionId,
        entity_type: EntityType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: TaskStatus::Skipped,
            error: Some(reason.into()),
            ..Self::new(jurisdiction, entity_type)
        }
    }

    pub fn record_failure(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.failed_ids.contains(&id) {
            self.failed_ids.push(id);
            self.failed += 1;
        }
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
    }
}

/// Aggregated result of one `synchronize` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskSummary>,
    /// Registry entries that were skipped this run.
    pub config_errors: Vec<ConfigError>,
}

impl RunReport {
    pub fn task(&self, jurisdiction: &JurisdictionId, entity_type: EntityType) -> Option<&TaskSummary> {
        self.tasks
            .iter()
            .find(|t| &t.jurisdiction == jurisdiction && t.entity_type == entity_type)
    }

    pub fn total_created(&self) -> u64 {
        self.tasks.iter().map(|t| t.created).sum()
    }

    pub fn total_updated(&self) -> u64 {
        self.tasks.iter().map(|t| t.updated).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks.iter().map(|t| t.failed).sum()
    }

    pub fn has_failures(&self) -> bool {
        !self.config_errors.is_empty()
            || self
                .tasks
                .iter()
                .any(|t| t.status == TaskStatus::Failed || t.failed > 0)
    }
}
