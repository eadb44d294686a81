/// Snapshot persistence trait for the job orchestration core
///
/// Defines the interface the queue and scheduler use to survive restarts.
/// Implementations own the storage location; writes replace the whole
/// snapshot and are safe to replay.
use crate::modules::jobs::domain::entities::Job;
use crate::modules::jobs::scheduler::SchedulerState;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the full queue state (all non-purged jobs plus counters)
    async fn save_queue(&self, snapshot: &QueueSnapshot) -> AppResult<()>;

    /// Load the most recent queue snapshot, None on a fresh store
    async fn load_queue(&self) -> AppResult<Option<QueueSnapshot>>;

    /// Persist the scheduler's runtime state alongside the queue snapshot
    async fn save_scheduler(&self, snapshot: &SchedulerSnapshot) -> AppResult<()>;

    /// Load the most recent scheduler snapshot, None on a fresh store
    async fn load_scheduler(&self) -> AppResult<Option<SchedulerSnapshot>>;
}

/// Durable queue state, sufficient to recompute all derived metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub total_processing_time_ms: u64,
    pub next_sequence: u64,
    pub saved_at: DateTime<Utc>,
}

/// Durable scheduler state. Control state and countdown are informational
/// on restart: a new scheduler starts idle with a fresh countdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    pub countdown_remaining_ms: u64,
    pub last_cycle_end: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
}
