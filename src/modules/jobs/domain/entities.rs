/// Domain entities for the job orchestration core
///
/// A job is one unit of scheduled work: fetch one target (a chapter, an
/// update scan) from one named scan source. Jobs are owned by the
/// `PriorityJobQueue`, which is the only component allowed to move them
/// through their lifecycle.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Priority bands, lower ordinal is served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Urgent,
    High,
    Normal,
}

impl JobPriority {
    /// Ordinal used in status reports and snapshots (1 = served first)
    pub fn ordinal(&self) -> u8 {
        match self {
            JobPriority::Urgent => 1,
            JobPriority::High => 2,
            JobPriority::Normal => 3,
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Urgent => write!(f, "urgent"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Normal => write!(f, "normal"),
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "urgent" => Ok(JobPriority::Urgent),
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            _ => Err(format!("Invalid job priority: {}", s)),
        }
    }
}

/// Whether a job came from a user action or the background cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrigin {
    Manual,
    Automatic,
}

impl JobOrigin {
    /// Priority applied when the submitter does not override it
    pub fn default_priority(&self) -> JobPriority {
        match self {
            JobOrigin::Manual => JobPriority::High,
            JobOrigin::Automatic => JobPriority::Normal,
        }
    }
}

impl std::fmt::Display for JobOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOrigin::Manual => write!(f, "manual"),
            JobOrigin::Automatic => write!(f, "automatic"),
        }
    }
}

/// Lifecycle states; a job is in exactly one at any instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

/// Submission request, built by callers and turned into a `Job` by the queue
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub target_id: String,
    pub source_name: String,
    pub origin: JobOrigin,
    pub priority: Option<JobPriority>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl JobRequest {
    /// A user-triggered job (defaults to high priority)
    pub fn manual(target_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            source_name: source_name.into(),
            origin: JobOrigin::Manual,
            priority: None,
            metadata: HashMap::new(),
            scheduled_for: None,
        }
    }

    /// A background job (always normal priority)
    pub fn automatic(target_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            source_name: source_name.into(),
            origin: JobOrigin::Automatic,
            priority: None,
            metadata: HashMap::new(),
            scheduled_for: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Delay eligibility until the given time (used for deferred auto scans)
    pub fn with_scheduled_for(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(when);
        self
    }

    /// Priority after applying the origin default
    pub fn effective_priority(&self) -> JobPriority {
        self.priority.unwrap_or_else(|| self.origin.default_priority())
    }
}

/// One unit of scheduled work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub target_id: String,
    pub source_name: String,
    pub priority: JobPriority,
    pub origin: JobOrigin,
    pub state: JobState,
    /// Caller-supplied attachment, preserved verbatim through the lifecycle
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Global submission order; FIFO tiebreaker within a priority band.
    /// Unchanged on retry so a retried job keeps its place.
    pub sequence: u64,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Job {
    pub fn from_request(request: JobRequest, sequence: u64) -> Self {
        let priority = request.effective_priority();
        Self {
            id: Uuid::new_v4(),
            target_id: request.target_id,
            source_name: request.source_name,
            priority,
            origin: request.origin,
            state: JobState::Queued,
            metadata: request.metadata,
            created_at: Utc::now(),
            sequence,
            scheduled_for: request.scheduled_for,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
            error_message: None,
        }
    }

    /// Check if the job may be handed out right now
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued
            && self.scheduled_for.map_or(true, |when| when <= now)
    }

    /// Check if another failure would be retried rather than terminal.
    /// A job gets `max_retries` failed attempts in total, so it is
    /// re-queued at most `max_retries - 1` times.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count + 1 < max_retries
    }

    /// Wall-clock time spent in the last activation, if both stamps exist
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}
