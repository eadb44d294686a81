/// Priority job queue invariants
///
/// Covers:
/// - Priority ordering and FIFO within a band
/// - Concurrency budget enforcement
/// - Retry accounting and permanent failure
/// - Metrics (success rate, average processing time)
/// - Typed errors for bad submissions and bad transitions
/// - Linearizable next() under concurrent callers
/// - The standalone processing loop
mod utils;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tsundoku::modules::jobs::{JobEventKind, JobPriority, JobRequest, JobState, QueueConfig};
use tsundoku::shared::errors::AppError;
use utils::executors::{registry_with, RecordingExecutor};
use utils::helpers;

// ================================================================================================
// PRIORITY ORDERING
// ================================================================================================

#[tokio::test]
async fn urgent_dispatched_before_normal() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 4,
            ..QueueConfig::default()
        },
    )
    .await;

    let urgent = queue
        .submit(JobRequest::manual("obra-urgent", "mangayabu").with_priority(JobPriority::Urgent))
        .await
        .unwrap();
    let normal = queue
        .submit(JobRequest::automatic("obra-normal", "mangayabu"))
        .await
        .unwrap();

    let first = queue.next().await.unwrap().unwrap();
    assert_eq!(first.id, urgent, "Urgent job should be handed out first");

    let second = queue.next().await.unwrap().unwrap();
    assert_eq!(second.id, normal);
}

#[tokio::test]
async fn priority_ordinals_never_decrease_across_next_calls() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 16,
            ..QueueConfig::default()
        },
    )
    .await;

    queue
        .submit(JobRequest::automatic("auto-1", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::manual("manual-1", "scan1").with_priority(JobPriority::Urgent))
        .await
        .unwrap();
    queue
        .submit(JobRequest::manual("manual-2", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("auto-2", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::manual("manual-3", "scan1").with_priority(JobPriority::Urgent))
        .await
        .unwrap();

    let mut ordinals = Vec::new();
    while let Some(job) = queue.next().await.unwrap() {
        ordinals.push(job.priority.ordinal());
    }

    assert_eq!(ordinals.len(), 5);
    let mut sorted = ordinals.clone();
    sorted.sort();
    assert_eq!(ordinals, sorted, "Priority ordinals must be non-decreasing");
}

#[tokio::test]
async fn fifo_within_same_priority() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 8,
            ..QueueConfig::default()
        },
    )
    .await;

    for i in 0..4 {
        queue
            .submit(JobRequest::automatic(format!("obra-{}", i), "scan1"))
            .await
            .unwrap();
    }

    for i in 0..4 {
        let job = queue.next().await.unwrap().unwrap();
        assert_eq!(
            job.target_id,
            format!("obra-{}", i),
            "Same-priority jobs must come out in submission order"
        );
    }
}

// ================================================================================================
// CONCURRENCY BUDGET
// ================================================================================================

#[tokio::test]
async fn budget_of_one_blocks_second_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    queue
        .submit(JobRequest::automatic("obra-1", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("obra-2", "scan1"))
        .await
        .unwrap();

    let first = queue.next().await.unwrap();
    assert!(first.is_some());

    let second = queue.next().await.unwrap();
    assert!(
        second.is_none(),
        "Budget of 1 must block a second dispatch while one job is active"
    );

    queue.complete(first.unwrap().id, None).await.unwrap();

    let after = queue.next().await.unwrap();
    assert!(after.is_some(), "Budget frees up once the active job resolves");
}

#[tokio::test]
async fn concurrent_next_hands_out_each_job_once() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 16,
            ..QueueConfig::default()
        },
    )
    .await;

    for i in 0..10 {
        queue
            .submit(JobRequest::automatic(format!("obra-{}", i), "scan1"))
            .await
            .unwrap();
    }

    let mut handles = vec![];
    for _ in 0..5 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(job) = queue.next().await.unwrap() {
                seen.push(job.id);
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    assert_eq!(all.len(), 10, "Every job handed out exactly once");
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 10, "No job handed out twice");
}

// ================================================================================================
// RETRY LOGIC
// ================================================================================================

#[tokio::test]
async fn two_failures_with_budget_two_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_retries: 2,
            ..QueueConfig::default()
        },
    )
    .await;

    let job_id = queue
        .submit(JobRequest::automatic("obra-1", "scan1"))
        .await
        .unwrap();

    // first failure: re-queued and still visible
    let attempt1 = queue.next().await.unwrap().unwrap();
    queue.fail(attempt1.id, "chapter list 404").await.unwrap();

    let after_first = queue.job_details(job_id).await.unwrap();
    assert_eq!(after_first.state, JobState::Queued);
    assert_eq!(after_first.retry_count, 1);
    assert_eq!(queue.status().await.queue_size, 1);

    // second failure: permanently failed
    let attempt2 = queue.next().await.unwrap().unwrap();
    assert_eq!(attempt2.id, job_id);
    queue.fail(attempt2.id, "chapter list 404").await.unwrap();

    let status = queue.status().await;
    assert_eq!(status.metrics.failed_count, 1);

    let done = queue.job_details(job_id).await.unwrap();
    assert_eq!(done.state, JobState::Failed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.error_message.as_deref(), Some("chapter list 404"));

    assert!(
        queue.next().await.unwrap().is_none(),
        "A permanently failed job must never be handed out again"
    );
}

#[tokio::test]
async fn retried_job_keeps_its_queue_position() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    let early = queue
        .submit(JobRequest::automatic("obra-early", "scan1"))
        .await
        .unwrap();

    let attempt = queue.next().await.unwrap().unwrap();
    assert_eq!(attempt.id, early);

    // a same-priority peer arrives while the first job is active
    queue
        .submit(JobRequest::automatic("obra-late", "scan1"))
        .await
        .unwrap();

    queue.fail(early, "flaky upstream").await.unwrap();

    let next = queue.next().await.unwrap().unwrap();
    assert_eq!(
        next.id, early,
        "A retried job must not lose its place behind later arrivals"
    );
}

#[tokio::test]
async fn retry_backoff_defers_eligibility() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            retry_backoff: Some(Duration::from_secs(60)),
            ..QueueConfig::default()
        },
    )
    .await;

    queue
        .submit(JobRequest::automatic("obra-1", "scan1"))
        .await
        .unwrap();

    let attempt = queue.next().await.unwrap().unwrap();
    queue.fail(attempt.id, "rate limited").await.unwrap();

    let details = queue.job_details(attempt.id).await.unwrap();
    assert_eq!(details.state, JobState::Queued);
    assert!(details.scheduled_for.is_some());

    assert!(
        queue.next().await.unwrap().is_none(),
        "A backed-off retry is not eligible immediately"
    );
}

// ================================================================================================
// SCHEDULED JOBS
// ================================================================================================

#[tokio::test]
async fn future_scheduled_job_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 4,
            ..QueueConfig::default()
        },
    )
    .await;

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    queue
        .submit(JobRequest::automatic("obra-later", "scan1").with_scheduled_for(later))
        .await
        .unwrap();
    let due_now = queue
        .submit(JobRequest::automatic("obra-now", "scan1"))
        .await
        .unwrap();

    let job = queue.next().await.unwrap().unwrap();
    assert_eq!(job.id, due_now, "A deferred job must not block eligible peers");

    assert!(queue.next().await.unwrap().is_none());
}

// ================================================================================================
// METRICS
// ================================================================================================

#[tokio::test]
async fn success_rate_is_zero_with_no_finished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    let status = queue.status().await;
    assert_eq!(status.metrics.completed_count, 0);
    assert_eq!(status.metrics.failed_count, 0);
    assert_eq!(status.metrics.success_rate, 0.0);
    assert_eq!(status.metrics.average_processing_time_ms, 0.0);
}

#[tokio::test]
async fn metrics_track_completions_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 2,
            max_retries: 1,
            ..QueueConfig::default()
        },
    )
    .await;

    queue
        .submit(JobRequest::automatic("obra-ok", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("obra-bad", "scan1"))
        .await
        .unwrap();

    let ok = queue.next().await.unwrap().unwrap();
    queue
        .complete(ok.id, Some(serde_json::json!({ "chapters": 3 })))
        .await
        .unwrap();

    // budget of one failed attempt: terminal right away
    let bad = queue.next().await.unwrap().unwrap();
    queue.fail(bad.id, "parser broke").await.unwrap();

    let status = queue.status().await;
    assert_eq!(status.metrics.completed_count, 1);
    assert_eq!(status.metrics.failed_count, 1);
    assert!((status.metrics.success_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.active_count, 0);

    let completed = queue.job_details(ok.id).await.unwrap();
    assert_eq!(completed.state, JobState::Completed);
    assert_eq!(completed.result, Some(serde_json::json!({ "chapters": 3 })));
}

#[tokio::test]
async fn status_counts_queued_jobs_by_priority_and_source() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    queue
        .submit(JobRequest::manual("obra-1", "mangayabu"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("obra-2", "mangayabu"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("obra-3", "scan2"))
        .await
        .unwrap();

    let status = queue.status().await;
    assert_eq!(status.queue_size, 3);
    assert_eq!(status.priority_counts.get("high"), Some(&1));
    assert_eq!(status.priority_counts.get("normal"), Some(&2));
    assert_eq!(status.source_counts.get("mangayabu"), Some(&2));
    assert_eq!(status.source_counts.get("scan2"), Some(&1));

    // next_jobs previews dispatch order
    assert_eq!(status.next_jobs.first().unwrap().target_id, "obra-1");
}

// ================================================================================================
// ERROR SURFACES
// ================================================================================================

#[tokio::test]
async fn empty_identifiers_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    let err = queue
        .submit(JobRequest::automatic("", "scan1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidJobSpec(_)));

    let err = queue
        .submit(JobRequest::automatic("obra-1", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidJobSpec(_)));

    let err = queue
        .submit(JobRequest::automatic("obra-1", "scan with spaces"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidJobSpec(_)));
}

#[tokio::test]
async fn transitions_require_active_state() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    let job_id = queue
        .submit(JobRequest::automatic("obra-1", "scan1"))
        .await
        .unwrap();

    // still queued: neither outcome is legal
    let err = queue.complete(job_id, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = queue.fail(job_id, "nope").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    // unknown ids are reported as such
    let err = queue.complete(uuid::Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = queue.job_details(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // completing twice is also illegal
    let job = queue.next().await.unwrap().unwrap();
    queue.complete(job.id, None).await.unwrap();
    let err = queue.complete(job.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn metadata_is_preserved_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;

    let mut metadata = HashMap::new();
    metadata.insert("requested_by".to_string(), serde_json::json!("dashboard"));
    metadata.insert("chapters".to_string(), serde_json::json!([101, 102]));

    let job_id = queue
        .submit(JobRequest::manual("obra-1", "scan1").with_metadata(metadata.clone()))
        .await
        .unwrap();

    let job = queue.next().await.unwrap().unwrap();
    queue.complete(job.id, None).await.unwrap();

    let details = queue.job_details(job_id).await.unwrap();
    assert_eq!(details.metadata, metadata);
}

// ================================================================================================
// EVENTS
// ================================================================================================

#[tokio::test]
async fn lifecycle_events_are_emitted_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(dir.path(), QueueConfig::default()).await;
    let mut events = queue.subscribe();

    let job_id = queue
        .submit(JobRequest::manual("obra-1", "mangayabu"))
        .await
        .unwrap();
    let job = queue.next().await.unwrap().unwrap();
    queue.complete(job.id, None).await.unwrap();

    let submitted = events.recv().await.unwrap();
    assert_eq!(submitted.job_id, job_id);
    assert!(matches!(submitted.kind, JobEventKind::Submitted { .. }));

    let started = events.recv().await.unwrap();
    assert!(matches!(started.kind, JobEventKind::Started));

    let completed = events.recv().await.unwrap();
    assert!(matches!(completed.kind, JobEventKind::Completed { .. }));
}

// ================================================================================================
// STANDALONE PROCESSING LOOP
// ================================================================================================

#[tokio::test]
async fn standalone_loop_processes_queued_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let queue = helpers::open_queue(
        dir.path(),
        QueueConfig {
            max_concurrent_jobs: 2,
            ..helpers::fast_queue_config()
        },
    )
    .await;

    let executor = Arc::new(RecordingExecutor::new("scan1"));
    let registry = registry_with(vec![executor.clone()]);

    queue
        .submit(JobRequest::automatic("obra-1", "scan1"))
        .await
        .unwrap();
    queue
        .submit(JobRequest::automatic("obra-2", "scan1"))
        .await
        .unwrap();

    assert!(queue.clone().start_processing(Arc::clone(&registry)));
    assert!(
        !queue.clone().start_processing(registry),
        "Second start must report already processing"
    );
    assert!(queue.status().await.is_processing);

    let queue_ref = Arc::clone(&queue);
    let done = helpers::eventually(
        || {
            let queue = Arc::clone(&queue_ref);
            async move { queue.status().await.metrics.completed_count == 2 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "Both jobs should be processed by the loop");

    assert_eq!(executor.executed_jobs().await.len(), 2);

    assert!(queue.stop_processing());
    assert!(!queue.stop_processing(), "Second stop must report not processing");
}
