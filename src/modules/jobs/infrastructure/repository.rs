/// JSON-file implementation of `SnapshotStore`
///
/// One directory per queue/scheduler instance, one file per snapshot kind.
/// Writes go through a temp file followed by a rename so a crash mid-write
/// never leaves a half-written snapshot behind.
use crate::modules::jobs::domain::repository::{QueueSnapshot, SchedulerSnapshot, SnapshotStore};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::TimedOperation;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

const QUEUE_FILE: &str = "queue_state.json";
const SCHEDULER_FILE: &str = "scheduler_state.json";

pub struct JsonSnapshotStore {
    queue_file: PathBuf,
    scheduler_file: PathBuf,
}

impl JsonSnapshotStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed
    pub fn new(data_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AppError::PersistenceError(format!(
                "Failed to create data dir {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            queue_file: data_dir.join(QUEUE_FILE),
            scheduler_file: data_dir.join(SCHEDULER_FILE),
        })
    }

    async fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            AppError::PersistenceError(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            AppError::PersistenceError(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> AppResult<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::PersistenceError(format!(
                        "Corrupt snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::PersistenceError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save_queue(&self, snapshot: &QueueSnapshot) -> AppResult<()> {
        let timer = TimedOperation::new("save queue snapshot");
        self.write_atomic(&self.queue_file, snapshot).await?;
        timer.finish();
        Ok(())
    }

    async fn load_queue(&self) -> AppResult<Option<QueueSnapshot>> {
        self.read_json(&self.queue_file).await
    }

    async fn save_scheduler(&self, snapshot: &SchedulerSnapshot) -> AppResult<()> {
        self.write_atomic(&self.scheduler_file, snapshot).await
    }

    async fn load_scheduler(&self) -> AppResult<Option<SchedulerSnapshot>> {
        self.read_json(&self.scheduler_file).await
    }
}
