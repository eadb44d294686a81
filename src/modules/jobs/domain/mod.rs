pub mod entities;
pub mod events;
pub mod repository;

pub use entities::{Job, JobOrigin, JobPriority, JobRequest, JobState};
pub use events::{JobEvent, JobEventKind};
pub use repository::{QueueSnapshot, SchedulerSnapshot, SnapshotStore};
