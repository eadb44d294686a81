/// Priority job queue: the single owner of job state
///
/// An in-memory, snapshot-persisted collection of jobs ordered by priority
/// band and submission order. Every lifecycle transition flows through the
/// four operations below (`submit`, `next`, `complete`, `fail`); the inner
/// aggregate sits behind one mutex so the operations are atomic with
/// respect to each other and `next` is linearizable across callers.
///
/// The queue can be driven by a `TimerDrivenScheduler` or run standalone
/// through its own processing loop (`start_processing`).
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::modules::jobs::domain::entities::{Job, JobPriority, JobRequest, JobState};
use crate::modules::jobs::domain::events::{JobEvent, JobEventKind};
use crate::modules::jobs::domain::repository::{QueueSnapshot, SnapshotStore};
use crate::modules::source::SourceRegistry;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::Validator;
use crate::{log_debug, log_error, log_info, log_warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Queue tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on concurrently active jobs
    pub max_concurrent_jobs: usize,
    /// Re-queue attempts before a failing job becomes permanently failed
    pub max_retries: u32,
    /// Idle cadence of the standalone processing loop
    pub poll_interval: Duration,
    /// When set, a retried job is deferred by `base * 2^retry_count`
    /// instead of becoming eligible immediately
    pub retry_backoff: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            retry_backoff: None,
        }
    }
}

/// Heap entry for the ready ordering: priority band first, then submission
/// order. `BinaryHeap` is a max-heap, so comparisons are reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: JobPriority,
    sequence: u64,
    id: Uuid,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ReadyEntry {
    fn for_job(job: &Job) -> Self {
        Self {
            priority: job.priority,
            sequence: job.sequence,
            id: job.id,
        }
    }
}

/// The mutable aggregate: all job state and counters live here, behind
/// the queue's single mutex
struct QueueInner {
    jobs: HashMap<Uuid, Job>,
    ready: BinaryHeap<ReadyEntry>,
    next_sequence: u64,
    active_count: usize,
    completed_count: u64,
    failed_count: u64,
    total_processing_time_ms: u64,
}

impl QueueInner {
    fn empty() -> Self {
        Self {
            jobs: HashMap::new(),
            ready: BinaryHeap::new(),
            next_sequence: 0,
            active_count: 0,
            completed_count: 0,
            failed_count: 0,
            total_processing_time_ms: 0,
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.jobs.values().cloned().collect(),
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            total_processing_time_ms: self.total_processing_time_ms,
            next_sequence: self.next_sequence,
            saved_at: Utc::now(),
        }
    }
}

/// Aggregate metrics exposed through `status()`
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub completed_count: u64,
    pub failed_count: u64,
    pub success_rate: f64,
    pub average_processing_time_ms: f64,
}

/// Point-in-time view of the queue, serializable for the dashboard layer
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub active_count: usize,
    pub priority_counts: HashMap<String, usize>,
    pub source_counts: HashMap<String, usize>,
    pub metrics: QueueMetrics,
    pub active_jobs: Vec<Job>,
    /// The next few jobs in dispatch order
    pub next_jobs: Vec<Job>,
    pub is_processing: bool,
    pub last_persistence_error: Option<String>,
}

pub struct PriorityJobQueue {
    inner: Mutex<QueueInner>,
    store: Arc<dyn SnapshotStore>,
    config: QueueConfig,
    events: broadcast::Sender<JobEvent>,
    processing: AtomicBool,
    process_cancel: std::sync::Mutex<Option<CancellationToken>>,
    last_persist_error: std::sync::Mutex<Option<String>>,
}

impl PriorityJobQueue {
    /// Open a queue against a snapshot store, rehydrating any persisted
    /// jobs and counters before accepting calls.
    ///
    /// Jobs that were active when the previous process died are reset to
    /// queued so they get picked up again.
    pub async fn open(store: Arc<dyn SnapshotStore>, config: QueueConfig) -> AppResult<Self> {
        let mut inner = QueueInner::empty();

        if let Some(snapshot) = store.load_queue().await? {
            inner.completed_count = snapshot.completed_count;
            inner.failed_count = snapshot.failed_count;
            inner.total_processing_time_ms = snapshot.total_processing_time_ms;
            inner.next_sequence = snapshot.next_sequence;

            let mut requeued = 0usize;
            for mut job in snapshot.jobs {
                if job.state == JobState::Active {
                    // previous process died mid-flight
                    job.state = JobState::Queued;
                    job.started_at = None;
                    requeued += 1;
                }
                if job.state == JobState::Queued {
                    inner.ready.push(ReadyEntry::for_job(&job));
                }
                // snapshots written before a crash can trail the live sequence
                inner.next_sequence = inner.next_sequence.max(job.sequence + 1);
                inner.jobs.insert(job.id, job);
            }

            log_info!(
                "Queue restored from snapshot: {} jobs ({} queued, {} reset from active)",
                inner.jobs.len(),
                inner.ready.len(),
                requeued
            );
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Mutex::new(inner),
            store,
            config,
            events,
            processing: AtomicBool::new(false),
            process_cancel: std::sync::Mutex::new(None),
            last_persist_error: std::sync::Mutex::new(None),
        })
    }

    /// Subscribe to job lifecycle events (for the delivery subsystem)
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Submit a new job. Returns its id, or `InvalidJobSpec` when the
    /// target or source identifiers are unusable.
    pub async fn submit(&self, request: JobRequest) -> AppResult<Uuid> {
        Validator::validate_target_id(&request.target_id)?;
        Validator::validate_source_name(&request.source_name)?;

        let (job_id, summary, event, snapshot) = {
            let mut inner = self.inner.lock().await;
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;

            let job = Job::from_request(request, sequence);
            let event = JobEvent::new(
                &job,
                JobEventKind::Submitted {
                    priority: job.priority,
                },
            );
            let summary = format!(
                "{} via {} ({}, priority {})",
                job.target_id, job.source_name, job.origin, job.priority
            );

            inner.ready.push(ReadyEntry::for_job(&job));
            let job_id = job.id;
            inner.jobs.insert(job_id, job);

            (job_id, summary, event, inner.snapshot())
        };

        log_info!("Job submitted: {} - {}", job_id, summary);
        self.emit(event);
        self.persist(snapshot).await;

        Ok(job_id)
    }

    /// Hand out the next eligible job, atomically marking it active.
    ///
    /// Returns `None` when no queued job is eligible or the concurrency
    /// budget is exhausted. No two callers ever receive the same job.
    pub async fn next(&self) -> AppResult<Option<Job>> {
        let now = Utc::now();

        let (job, event) = {
            let mut inner = self.inner.lock().await;

            if inner.active_count >= self.config.max_concurrent_jobs {
                return Ok(None);
            }

            // Pop in dispatch order, setting aside jobs deferred into the
            // future and dropping entries whose job already moved on.
            let mut deferred: Vec<ReadyEntry> = Vec::new();
            let mut picked: Option<Uuid> = None;
            while let Some(entry) = inner.ready.pop() {
                match inner.jobs.get(&entry.id) {
                    Some(job) if job.state == JobState::Queued => {
                        if job.is_eligible(now) {
                            picked = Some(entry.id);
                            break;
                        }
                        deferred.push(entry);
                    }
                    _ => {}
                }
            }
            for entry in deferred {
                inner.ready.push(entry);
            }

            let id = match picked {
                Some(id) => id,
                None => return Ok(None),
            };

            let job = inner.jobs.get_mut(&id).ok_or_else(|| {
                AppError::InternalError(format!("Ready entry without job: {}", id))
            })?;
            job.state = JobState::Active;
            job.started_at = Some(now);
            let event = JobEvent::new(job, JobEventKind::Started);
            let job = job.clone();

            inner.active_count += 1;

            (job, event)
        };

        log_debug!("Job handed out for processing: {}", job.id);
        self.emit(event);

        Ok(Some(job))
    }

    /// Record a successful outcome for an active job
    pub async fn complete(&self, job_id: Uuid, result: Option<serde_json::Value>) -> AppResult<()> {
        let (event, snapshot, duration_ms) = {
            let mut inner = self.inner.lock().await;
            let job = inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::NotFound(format!("Unknown job id: {}", job_id)))?;

            if job.state != JobState::Active {
                return Err(AppError::InvalidTransition(format!(
                    "Job {} is {}, expected active",
                    job_id, job.state
                )));
            }

            job.state = JobState::Completed;
            job.completed_at = Some(Utc::now());
            job.result = result;
            let duration_ms = job
                .processing_time()
                .map(|d| d.num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            let event = JobEvent::new(
                job,
                JobEventKind::Completed {
                    processing_time_ms: duration_ms,
                },
            );

            inner.active_count -= 1;
            inner.completed_count += 1;
            inner.total_processing_time_ms += duration_ms;

            (event, inner.snapshot(), duration_ms)
        };

        log_info!("Job completed: {} in {}ms", job_id, duration_ms);
        self.emit(event);
        self.persist(snapshot).await;

        Ok(())
    }

    /// Record a failed attempt for an active job.
    ///
    /// Below the retry budget the job re-enters the queue at its original
    /// priority with `created_at` and `sequence` unchanged, so it does not
    /// lose its place behind same-priority peers submitted later. At the
    /// budget it becomes permanently failed.
    pub async fn fail(&self, job_id: Uuid, error_message: impl Into<String>) -> AppResult<()> {
        let error_message = error_message.into();
        let max_retries = self.config.max_retries;
        let retry_backoff = self.config.retry_backoff;

        let (event, snapshot, retried, retry_count) = {
            let mut inner = self.inner.lock().await;
            let job = inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::NotFound(format!("Unknown job id: {}", job_id)))?;

            if job.state != JobState::Active {
                return Err(AppError::InvalidTransition(format!(
                    "Job {} is {}, expected active",
                    job_id, job.state
                )));
            }

            job.error_message = Some(error_message.clone());

            if job.can_retry(max_retries) {
                job.retry_count += 1;
                job.state = JobState::Queued;
                job.started_at = None;
                if let Some(base) = retry_backoff {
                    let factor = 2u32.saturating_pow(job.retry_count);
                    let delay_ms = (base.as_millis() as i64).saturating_mul(factor as i64);
                    job.scheduled_for = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms));
                }
                let entry = ReadyEntry::for_job(job);
                let retry_count = job.retry_count;
                let event = JobEvent::new(
                    job,
                    JobEventKind::Retried {
                        retry_count,
                        error_message,
                    },
                );

                inner.active_count -= 1;
                inner.ready.push(entry);

                (event, inner.snapshot(), true, retry_count)
            } else {
                job.state = JobState::Failed;
                job.completed_at = Some(Utc::now());
                let retry_count = job.retry_count;
                let event = JobEvent::new(job, JobEventKind::Failed { error_message });

                inner.active_count -= 1;
                inner.failed_count += 1;

                (event, inner.snapshot(), false, retry_count)
            }
        };

        if retried {
            log_info!(
                "Job re-queued after failure: {} (attempt {}/{})",
                job_id,
                retry_count,
                max_retries
            );
        } else {
            log_error!("Job failed permanently: {} after {} retries", job_id, retry_count);
        }
        self.emit(event);
        self.persist(snapshot).await;

        Ok(())
    }

    /// Fetch one job by id
    pub async fn job_details(&self, job_id: Uuid) -> AppResult<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown job id: {}", job_id)))
    }

    /// Point-in-time status snapshot for monitoring
    pub async fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().await;

        let mut priority_counts: HashMap<String, usize> = HashMap::new();
        let mut source_counts: HashMap<String, usize> = HashMap::new();
        let mut queued: Vec<&Job> = Vec::new();
        let mut active_jobs: Vec<Job> = Vec::new();

        for job in inner.jobs.values() {
            match job.state {
                JobState::Queued => {
                    *priority_counts.entry(job.priority.to_string()).or_insert(0) += 1;
                    *source_counts.entry(job.source_name.clone()).or_insert(0) += 1;
                    queued.push(job);
                }
                JobState::Active => active_jobs.push(job.clone()),
                _ => {}
            }
        }

        queued.sort_by_key(|job| (job.priority, job.sequence));
        let next_jobs: Vec<Job> = queued.iter().take(5).map(|job| (*job).clone()).collect();

        let finished = inner.completed_count + inner.failed_count;
        let success_rate = if finished == 0 {
            0.0
        } else {
            inner.completed_count as f64 / finished as f64
        };
        let average_processing_time_ms = if inner.completed_count == 0 {
            0.0
        } else {
            inner.total_processing_time_ms as f64 / inner.completed_count as f64
        };

        QueueStatus {
            queue_size: queued.len(),
            active_count: inner.active_count,
            priority_counts,
            source_counts,
            metrics: QueueMetrics {
                completed_count: inner.completed_count,
                failed_count: inner.failed_count,
                success_rate,
                average_processing_time_ms,
            },
            active_jobs,
            next_jobs,
            is_processing: self.processing.load(AtomicOrdering::SeqCst),
            last_persistence_error: self
                .last_persist_error
                .lock()
                .ok()
                .and_then(|guard| guard.clone()),
        }
    }

    /// Check for an eligible job above the normal band (used by the
    /// scheduler to cut a countdown short for manual work)
    pub async fn has_priority_work(&self) -> bool {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .any(|job| job.is_eligible(now) && job.priority < JobPriority::Normal)
    }

    /// Start the standalone processing loop, dispatching jobs to the given
    /// executor table. Returns `false` if already processing.
    pub fn start_processing(self: Arc<Self>, executors: Arc<SourceRegistry>) -> bool {
        if self
            .processing
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            log_warn!("Queue is already processing");
            return false;
        }

        let token = CancellationToken::new();
        if let Ok(mut guard) = self.process_cancel.lock() {
            *guard = Some(token.clone());
        }

        let queue = Arc::clone(&self);
        tokio::spawn(async move {
            queue.process_loop(executors, token).await;
        });

        log_info!("Queue processing started");
        true
    }

    /// Stop the standalone processing loop. In-flight jobs are allowed to
    /// resolve. Returns `false` if not processing.
    pub fn stop_processing(&self) -> bool {
        if self
            .processing
            .compare_exchange(true, false, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            log_warn!("Queue is not processing");
            return false;
        }

        if let Ok(guard) = self.process_cancel.lock() {
            if let Some(token) = guard.as_ref() {
                token.cancel();
            }
        }

        log_info!("Queue processing stop requested");
        true
    }

    async fn process_loop(&self, executors: Arc<SourceRegistry>, token: CancellationToken) {
        log_info!("Queue processing loop started");

        let mut in_flight = FuturesUnordered::new();
        loop {
            if token.is_cancelled() {
                break;
            }

            // fill the concurrency budget; next() enforces the bound
            loop {
                match self.next().await {
                    Ok(Some(job)) => in_flight.push(self.execute_job(&executors, job, None)),
                    Ok(None) => break,
                    Err(e) => {
                        log_error!("Error in queue processing loop: {}", e);
                        break;
                    }
                }
            }

            if in_flight.is_empty() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            } else {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = in_flight.next() => {}
                }
            }
        }

        // let anything already dispatched resolve before exiting
        while in_flight.next().await.is_some() {}

        log_info!("Queue processing loop stopped");
    }

    /// Execute one job through the capability table and route the outcome
    /// back into the state machine. Execution failures never escape: they
    /// are absorbed by `fail` and its retry accounting.
    pub(crate) async fn execute_job(
        &self,
        executors: &SourceRegistry,
        job: Job,
        timeout: Option<Duration>,
    ) {
        let job_id = job.id;
        let outcome = match executors.get(&job.source_name) {
            Some(executor) => match timeout {
                Some(limit) => match tokio::time::timeout(limit, executor.execute(&job)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::ExecutionError(format!(
                        "Timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => executor.execute(&job).await,
            },
            None => Err(AppError::ExecutionError(format!(
                "No source executor registered for '{}'",
                job.source_name
            ))),
        };

        let routed = match outcome {
            Ok(result) => self.complete(job_id, Some(result)).await,
            Err(e) => {
                log_warn!("Job {} attempt failed: {}", job_id, e);
                self.fail(job_id, e.to_string()).await
            }
        };

        if let Err(e) = routed {
            // the job may have been reconciled elsewhere; accounting must not halt
            log_error!("Failed to record outcome for job {}: {}", job_id, e);
        }
    }

    fn emit(&self, event: JobEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Best-effort snapshot write: failures are logged and surfaced via
    /// `status()`, never rolled back into memory state
    async fn persist(&self, snapshot: QueueSnapshot) {
        match self.store.save_queue(&snapshot).await {
            Ok(()) => {
                if let Ok(mut guard) = self.last_persist_error.lock() {
                    *guard = None;
                }
            }
            Err(e) => {
                log_error!("Failed to persist queue snapshot: {}", e);
                if let Ok(mut guard) = self.last_persist_error.lock() {
                    *guard = Some(e.to_string());
                }
            }
        }
    }
}
