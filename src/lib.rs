//! tsundoku: scheduled chapter archiver core
//!
//! Coordinates manual (user-triggered) and automatic (background) fetch
//! jobs against many independent scan sources, so that neither starves the
//! other, both survive restarts, and no upstream gets hammered.
//!
//! Two components do the work:
//! - [`modules::jobs::PriorityJobQueue`] owns job identity, lifecycle
//!   transitions, bounded-concurrency dispatch, metrics and persistence.
//! - [`modules::jobs::TimerDrivenScheduler`] owns pacing: when cycles run,
//!   the post-cycle cooldown, and the run/pause/stop control surface.
//!
//! Per-site fetch logic stays outside the core behind the
//! [`modules::source::SourceExecutor`] contract, registered in a
//! [`modules::source::SourceRegistry`] at composition time.

pub mod modules;
pub mod shared;

pub use modules::jobs::{
    Job, JobEvent, JobOrigin, JobPriority, JobRequest, JobState, JsonSnapshotStore,
    PriorityJobQueue, QueueConfig, QueueStatus, SchedulerConfig, SchedulerState, SchedulerStatus,
    SnapshotStore, StopBehavior, TimerDrivenScheduler,
};
pub use modules::source::{SourceExecutor, SourceRegistry};
pub use shared::errors::{AppError, AppResult};
pub use shared::utils::init_logger;
