//! Incremental change detection.
//!
//! Each (jurisdiction, entity type) pair runs one `SyncCycle` through
//! Idle → Scanning → Reconciling → Committed. The watermark only moves on commit.

pub mod engine;
pub mod models;

pub use engine::{ChangeTracker, CommitOutcome, RejectedDigest, SyncCycle};
pub use models::{
    DigestAction, DigestScope, DigestUpdate, ReconciledChange, SyncMode, SyncWatermark,
    TrackerPhase, UpdateToken, WatermarkKey,
};
