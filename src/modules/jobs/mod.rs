/// Job orchestration module
///
/// The core of the crate: a priority-ordered, snapshot-persisted job queue
/// plus the timer-driven scheduler that paces it.
///
/// Architecture:
/// - Domain: entities, lifecycle events and the snapshot store trait
/// - Infrastructure: JSON-file snapshot store
/// - Queue: the single owner of job state transitions
/// - Scheduler: cooperative control loop (start/pause/resume/stop)
pub mod domain;
pub mod infrastructure;
pub mod queue;
pub mod scheduler;

// Re-exports for easy access
pub use domain::{
    entities::{Job, JobOrigin, JobPriority, JobRequest, JobState},
    events::{JobEvent, JobEventKind},
    repository::{QueueSnapshot, SchedulerSnapshot, SnapshotStore},
};
pub use infrastructure::JsonSnapshotStore;
pub use queue::{PriorityJobQueue, QueueConfig, QueueMetrics, QueueStatus};
pub use scheduler::{
    SchedulerConfig, SchedulerState, SchedulerStatus, StopBehavior, TimerDrivenScheduler,
};
