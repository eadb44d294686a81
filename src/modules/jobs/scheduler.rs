/// Timer-driven scheduler: pacing and control surface over a job queue
///
/// Owns when processing cycles start and how long to wait after a cycle
/// drains before starting the next. The countdown is armed only after all
/// of a cycle's jobs have resolved, so the cadence adapts to how long the
/// previous cycle actually took and slow sources are never hammered
/// back-to-back.
///
/// The scheduler never mutates a job directly: it asks the queue for work
/// and reports outcomes back through the queue's completion/failure API.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::modules::jobs::domain::entities::{JobPriority, JobRequest};
use crate::modules::jobs::domain::repository::{SchedulerSnapshot, SnapshotStore};
use crate::modules::jobs::queue::{PriorityJobQueue, QueueConfig, QueueStatus};
use crate::modules::source::SourceRegistry;
use crate::shared::errors::AppResult;
use crate::{log_debug, log_error, log_info, log_warn};

use futures::stream::{FuturesUnordered, StreamExt};

/// Cooperative tick: the loop re-checks control state at this cadence
const TICK: Duration = Duration::from_millis(50);

/// Bounded wait for the loop to wind down on stop
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Control states; stopped is terminal until a new scheduler is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Paused => write!(f, "paused"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What to do with in-flight jobs when the scheduler stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBehavior {
    /// Let active jobs resolve and record their outcome (safe default)
    WaitForActive,
    /// Leave active jobs behind; they stay active in the snapshot and are
    /// reset to queued when the next instance opens the same store
    AbandonActive,
}

/// Scheduler tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cooldown after a cycle drains before the next one starts
    pub timer_interval: Duration,
    pub max_retries: u32,
    /// Periodic persistence cadence while counting down
    pub save_state_interval: Duration,
    pub max_concurrent_jobs: usize,
    /// Per-dispatch time limit; an expired dispatch counts as a failed attempt
    pub job_timeout: Option<Duration>,
    pub stop_behavior: StopBehavior,
    /// Let an eligible manual-priority job end the countdown early
    pub manual_cutin: bool,
    /// Defer retried jobs by `base * 2^retry_count` instead of immediately
    pub retry_backoff: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_interval: Duration::from_secs(30 * 60),
            max_retries: 3,
            save_state_interval: Duration::from_secs(60),
            max_concurrent_jobs: 1,
            job_timeout: None,
            stop_behavior: StopBehavior::WaitForActive,
            manual_cutin: true,
            retry_backoff: None,
        }
    }
}

impl SchedulerConfig {
    /// Queue configuration derived from the scheduler's knobs
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
            ..QueueConfig::default()
        }
    }
}

/// Unified status view: scheduler state plus the queue's own snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub countdown_remaining_ms: u64,
    pub last_cycle_end: Option<DateTime<Utc>>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    pub queue: QueueStatus,
    pub config: SchedulerConfig,
}

pub struct TimerDrivenScheduler {
    queue: Arc<PriorityJobQueue>,
    executors: Arc<SourceRegistry>,
    store: Arc<dyn SnapshotStore>,
    config: SchedulerConfig,
    state: RwLock<SchedulerState>,
    countdown_remaining: Mutex<Duration>,
    last_cycle_end: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerDrivenScheduler {
    /// Open a scheduler with its own queue against the given store.
    /// Rehydrates the queue snapshot; the countdown always restarts fresh.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        executors: Arc<SourceRegistry>,
        config: SchedulerConfig,
    ) -> AppResult<Self> {
        let queue =
            Arc::new(PriorityJobQueue::open(Arc::clone(&store), config.queue_config()).await?);
        Self::with_queue(queue, executors, store, config).await
    }

    /// Wrap an externally built queue
    pub async fn with_queue(
        queue: Arc<PriorityJobQueue>,
        executors: Arc<SourceRegistry>,
        store: Arc<dyn SnapshotStore>,
        config: SchedulerConfig,
    ) -> AppResult<Self> {
        // only the last cycle end survives a restart; control state is
        // rebuilt from scratch
        let last_cycle_end = match store.load_scheduler().await {
            Ok(Some(snapshot)) => snapshot.last_cycle_end,
            Ok(None) => None,
            Err(e) => {
                log_warn!("Could not read previous scheduler state: {}", e);
                None
            }
        };

        Ok(Self {
            queue,
            executors,
            store,
            config,
            state: RwLock::new(SchedulerState::Idle),
            countdown_remaining: Mutex::new(Duration::ZERO),
            last_cycle_end: Mutex::new(last_cycle_end),
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        })
    }

    /// The queue this scheduler drives
    pub fn queue(&self) -> &Arc<PriorityJobQueue> {
        &self.queue
    }

    /// Add a user-triggered job (high priority unless overridden)
    pub async fn add_manual_job(
        &self,
        target_id: impl Into<String>,
        source_name: impl Into<String>,
        priority: Option<JobPriority>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> AppResult<Uuid> {
        let mut request = JobRequest::manual(target_id, source_name);
        if let Some(priority) = priority {
            request = request.with_priority(priority);
        }
        if let Some(metadata) = metadata {
            request = request.with_metadata(metadata);
        }
        self.queue.submit(request).await
    }

    /// Add a background job (always normal priority)
    pub async fn add_auto_job(
        &self,
        target_id: impl Into<String>,
        source_name: impl Into<String>,
    ) -> AppResult<Uuid> {
        self.queue
            .submit(JobRequest::automatic(target_id, source_name))
            .await
    }

    /// Start the control loop. Returns `false` unless the scheduler is idle.
    pub async fn start(self: Arc<Self>) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Idle {
                log_warn!("Scheduler cannot start from state '{}'", *state);
                return false;
            }
            *state = SchedulerState::Running;
        }

        log_info!("Scheduler started");
        self.persist_state().await;

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            scheduler.run_loop().await;
        });
        *self.loop_handle.lock().await = Some(handle);

        true
    }

    /// Freeze dispatch and the countdown. Only valid while running.
    pub async fn pause(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Running {
                log_warn!("Scheduler cannot pause from state '{}'", *state);
                return false;
            }
            *state = SchedulerState::Paused;
        }

        log_info!("Scheduler paused");
        self.persist_state().await;
        true
    }

    /// Resume from pause; the countdown continues where it left off.
    pub async fn resume(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Paused {
                log_warn!("Scheduler cannot resume from state '{}'", *state);
                return false;
            }
            *state = SchedulerState::Running;
        }

        log_info!("Scheduler resumed");
        self.persist_state().await;
        true
    }

    /// Stop the scheduler. Cancels the countdown, handles in-flight jobs
    /// per `stop_behavior`, flushes a final snapshot. Terminal.
    pub async fn stop(&self) -> bool {
        let had_loop = {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Stopped {
                log_warn!("Scheduler is already stopped");
                return false;
            }
            let had_loop = *state != SchedulerState::Idle;
            *state = SchedulerState::Stopped;
            had_loop
        };

        self.cancel.cancel();

        if had_loop {
            if let Some(handle) = self.loop_handle.lock().await.take() {
                if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                    log_warn!(
                        "Scheduler loop did not wind down within {}s",
                        STOP_JOIN_TIMEOUT.as_secs()
                    );
                }
            }
        }

        log_info!("Scheduler stopped");
        self.persist_state().await;
        true
    }

    /// Unified status for operators and the dashboard
    pub async fn get_status(&self) -> SchedulerStatus {
        let state = *self.state.read().await;
        let remaining = *self.countdown_remaining.lock().await;
        let last_cycle_end = *self.last_cycle_end.lock().await;

        let next_cycle_at = if state == SchedulerState::Running && remaining > Duration::ZERO {
            Some(Utc::now() + chrono::Duration::milliseconds(remaining.as_millis() as i64))
        } else {
            None
        };

        SchedulerStatus {
            state,
            countdown_remaining_ms: remaining.as_millis() as u64,
            last_cycle_end,
            next_cycle_at,
            queue: self.queue.status().await,
            config: self.config.clone(),
        }
    }

    async fn run_loop(self: Arc<Self>) {
        log_info!("Scheduler loop started");
        let mut last_save = Instant::now();

        loop {
            if !self.wait_until_running().await {
                break;
            }

            self.run_cycle().await;
            if self.cancel.is_cancelled() {
                break;
            }

            *self.last_cycle_end.lock().await = Some(Utc::now());
            self.persist_state().await;

            if !self.run_countdown(&mut last_save).await {
                break;
            }
        }

        log_info!("Scheduler loop finished");
    }

    /// Block while paused; `false` once stop was requested
    async fn wait_until_running(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if *self.state.read().await == SchedulerState::Running {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(TICK) => {}
            }
        }
    }

    /// One processing cycle: dispatch until nothing is eligible and every
    /// dispatched job has resolved. Pausing suspends new dispatch but lets
    /// in-flight jobs finish.
    async fn run_cycle(&self) {
        let mut in_flight = FuturesUnordered::new();
        let mut dispatched = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if *self.state.read().await == SchedulerState::Paused {
                if in_flight.is_empty() {
                    break;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = in_flight.next() => {}
                }
                continue;
            }

            match self.queue.next().await {
                Ok(Some(job)) => {
                    dispatched += 1;
                    log_debug!("Dispatching job {} ({})", job.id, job.source_name);
                    in_flight.push(self.queue.execute_job(
                        &self.executors,
                        job,
                        self.config.job_timeout,
                    ));
                    continue;
                }
                Ok(None) => {
                    if in_flight.is_empty() {
                        break;
                    }
                }
                Err(e) => {
                    log_error!("Error asking the queue for work: {}", e);
                    if in_flight.is_empty() {
                        break;
                    }
                }
            }

            // budget saturated or nothing eligible: wait for a resolution
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = in_flight.next() => {}
            }
        }

        if self.cancel.is_cancelled() && !in_flight.is_empty() {
            match self.config.stop_behavior {
                StopBehavior::WaitForActive => {
                    log_info!("Stop requested, waiting for {} active jobs", in_flight.len());
                    while in_flight.next().await.is_some() {}
                }
                StopBehavior::AbandonActive => {
                    log_warn!(
                        "Stop requested, abandoning {} active jobs; they will be \
                         re-queued when this store is opened again",
                        in_flight.len()
                    );
                }
            }
        } else {
            while in_flight.next().await.is_some() {}
        }

        if dispatched > 0 {
            log_info!("Cycle drained after {} dispatched jobs", dispatched);
        }
    }

    /// Cooldown between cycles. Pausing freezes the remaining time; an
    /// eligible manual job can cut the wait short. `false` once stop was
    /// requested.
    async fn run_countdown(&self, last_save: &mut Instant) -> bool {
        *self.countdown_remaining.lock().await = self.config.timer_interval;
        log_debug!("Countdown armed: {:?}", self.config.timer_interval);

        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            let running = *self.state.read().await == SchedulerState::Running;
            if running {
                if self.config.manual_cutin && self.queue.has_priority_work().await {
                    log_info!("Manual-priority job waiting, ending countdown early");
                    *self.countdown_remaining.lock().await = Duration::ZERO;
                    return true;
                }

                if *self.countdown_remaining.lock().await == Duration::ZERO {
                    return true;
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(TICK) => {
                        let mut remaining = self.countdown_remaining.lock().await;
                        *remaining = remaining.saturating_sub(TICK);
                    }
                }
            } else {
                // paused: hold the remaining time in place
                tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(TICK) => {}
                }
            }

            if last_save.elapsed() >= self.config.save_state_interval {
                *last_save = Instant::now();
                self.persist_state().await;
            }
        }
    }

    /// Best-effort scheduler snapshot, written alongside the queue's
    async fn persist_state(&self) {
        let snapshot = SchedulerSnapshot {
            state: *self.state.read().await,
            countdown_remaining_ms: self.countdown_remaining.lock().await.as_millis() as u64,
            last_cycle_end: *self.last_cycle_end.lock().await,
            saved_at: Utc::now(),
        };

        if let Err(e) = self.store.save_scheduler(&snapshot).await {
            log_error!("Failed to persist scheduler state: {}", e);
        }
    }
}
