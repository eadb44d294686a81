/// Test source executors with controllable behavior
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use tsundoku::modules::jobs::Job;
use tsundoku::modules::source::{SourceExecutor, SourceRegistry};
use tsundoku::shared::errors::{AppError, AppResult};

/// Records every job it executes, succeeding after an optional delay
pub struct RecordingExecutor {
    name: String,
    delay: Option<Duration>,
    executed: Arc<Mutex<Vec<Uuid>>>,
}

impl RecordingExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay: Some(delay),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn executed_jobs(&self) -> Vec<Uuid> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl SourceExecutor for RecordingExecutor {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, job: &Job) -> AppResult<serde_json::Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.executed.lock().await.push(job.id);
        Ok(serde_json::json!({ "target": job.target_id }))
    }
}

/// Fails the first `failures` attempts, then succeeds
pub struct FlakyExecutor {
    name: String,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyExecutor {
    pub fn new(name: impl Into<String>, failures: u32) -> Self {
        Self {
            name: name.into(),
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceExecutor for FlakyExecutor {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, job: &Job) -> AppResult<serde_json::Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(AppError::ExecutionError(format!(
                "Simulated failure {} for {}",
                attempt, job.target_id
            )))
        } else {
            Ok(serde_json::json!({ "target": job.target_id, "attempt": attempt }))
        }
    }
}

pub fn registry_with(executors: Vec<Arc<dyn SourceExecutor>>) -> Arc<SourceRegistry> {
    let registry = SourceRegistry::new();
    for executor in executors {
        registry.register(executor);
    }
    Arc::new(registry)
}
