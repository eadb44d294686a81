/// Test helper functions and builders
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tsundoku::modules::jobs::{JsonSnapshotStore, PriorityJobQueue, QueueConfig};

pub fn store_at(dir: &Path) -> Arc<JsonSnapshotStore> {
    Arc::new(JsonSnapshotStore::new(dir).unwrap())
}

pub async fn open_queue(dir: &Path, config: QueueConfig) -> Arc<PriorityJobQueue> {
    Arc::new(
        PriorityJobQueue::open(store_at(dir), config)
            .await
            .unwrap(),
    )
}

/// Queue config with a fast poll cadence for tests
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_millis(25),
        ..QueueConfig::default()
    }
}

/// Poll a condition until it holds or the timeout passes
pub async fn eventually<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
