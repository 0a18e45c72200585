//! Sync orchestration: one task per (jurisdiction, entity type), legislators before bills.

pub mod engine;
pub mod models;
pub mod sponsors;

pub use engine::SyncOrchestrator;
pub use models::{RunReport, SyncRequest, SyncTrigger, TaskStatus, TaskSummary};
