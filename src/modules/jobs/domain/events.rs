/// Domain events emitted by the job queue
///
/// The delivery/notification subsystem subscribes to these through
/// `PriorityJobQueue::subscribe`; the core only emits and never waits on
/// consumers. Events are serializable so they can be forwarded to webhooks
/// or a notifier without re-shaping.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::jobs::domain::entities::{Job, JobOrigin, JobPriority};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub job_id: Uuid,
    pub target_id: String,
    pub source_name: String,
    pub origin: JobOrigin,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Submitted { priority: JobPriority },
    Started,
    Completed { processing_time_ms: u64 },
    Retried { retry_count: u32, error_message: String },
    Failed { error_message: String },
}

impl JobEvent {
    pub fn new(job: &Job, kind: JobEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            job_id: job.id,
            target_id: job.target_id.clone(),
            source_name: job.source_name.clone(),
            origin: job.origin,
            kind,
        }
    }

    /// Type tag for routing/serialization
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            JobEventKind::Submitted { .. } => "JobSubmitted",
            JobEventKind::Started => "JobStarted",
            JobEventKind::Completed { .. } => "JobCompleted",
            JobEventKind::Retried { .. } => "JobRetried",
            JobEventKind::Failed { .. } => "JobFailed",
        }
    }
}
