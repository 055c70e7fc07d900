use crate::checkpoint::manager::CheckpointManager;
use crate::checkpoint::types::retry_backoff;
use crate::error::{EngineError, Result};
use crate::executor::JobExecutor;
use crate::queue::types::{JobId, JobSpec, ProcessingJob, QueueStats};
use crate::session::types::SessionId;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the per-session job queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
        }
    }
}

/// Per-session priority job queues with single-flight execution.
///
/// Each session gets one scheduler task that blocks on a work-available
/// signal instead of timer-driven self-rescheduling; different sessions
/// proceed independently. The `processing` flag and every queue mutation
/// live under one mutex per session, so two schedulers can never race on
/// the same queue.
pub struct JobQueueManager {
    checkpoints: Arc<CheckpointManager>,
    executor: Arc<dyn JobExecutor>,
    queues: DashMap<SessionId, Arc<SessionQueue>>,
    config: QueueConfig,
}

struct SessionQueue {
    session_id: SessionId,
    inner: Mutex<QueueInner>,
    notify: Notify,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct QueueInner {
    jobs: Vec<ProcessingJob>,
    completed_ids: HashSet<JobId>,
    paused: bool,
    processing: bool,
    total_jobs: u64,
    completed_jobs: u64,
    failed_jobs: u64,
    queued_jobs: u64,
    total_duration_ms: u64,
}

/// What the scheduler decided to do after one look at the queue.
enum Decision {
    Run(ProcessingJob),
    /// Nothing eligible yet; wake at this delay or on the next signal.
    Sleep(Option<std::time::Duration>),
}

impl JobQueueManager {
    pub fn new(
        checkpoints: Arc<CheckpointManager>,
        executor: Arc<dyn JobExecutor>,
        config: QueueConfig,
    ) -> Self {
        Self {
            checkpoints,
            executor,
            queues: DashMap::new(),
            config,
        }
    }

    /// Create the queue for a session and start its scheduler. Idempotent.
    pub async fn create_queue(self: &Arc<Self>, session_id: SessionId) {
        let queue = match self.queues.entry(session_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let queue = Arc::new(SessionQueue {
                    session_id,
                    inner: Mutex::new(QueueInner::default()),
                    notify: Notify::new(),
                    scheduler: Mutex::new(None),
                });
                vacant.insert(queue.clone());
                queue
            }
        };

        let manager = Arc::clone(self);
        let handle = tokio::spawn({
            let queue = queue.clone();
            async move { manager.run_scheduler(queue).await }
        });
        *queue.scheduler.lock().await = Some(handle);

        info!("Created job queue for session {}", session_id);
    }

    fn queue(&self, session_id: SessionId) -> Result<Arc<SessionQueue>> {
        self.queues
            .get(&session_id)
            .map(|q| q.clone())
            .ok_or(EngineError::QueueNotFound(session_id))
    }

    /// Enqueue a job, assigning its id and `queued_at`, and kick the
    /// scheduler if it is idle.
    pub async fn enqueue(&self, session_id: SessionId, spec: JobSpec) -> Result<JobId> {
        let queue = self.queue(session_id)?;
        let max_retries = spec.max_retries.unwrap_or(self.config.default_max_retries);
        let job = ProcessingJob::from_spec(spec, max_retries);
        let job_id = job.id;

        {
            let mut inner = queue.inner.lock().await;
            inner.total_jobs += 1;
            inner.queued_jobs += 1;
            inner.jobs.push(job);
        }
        queue.notify.notify_one();

        debug!("Enqueued job {} for session {}", job_id, session_id);
        Ok(job_id)
    }

    /// Pause scheduling. An in-flight job finishes; no new one starts.
    pub async fn pause(&self, session_id: SessionId) -> Result<()> {
        let queue = self.queue(session_id)?;
        queue.inner.lock().await.paused = true;
        info!("Paused queue for session {}", session_id);
        Ok(())
    }

    /// Resume scheduling and kick the scheduler if idle.
    pub async fn resume(&self, session_id: SessionId) -> Result<()> {
        let queue = self.queue(session_id)?;
        queue.inner.lock().await.paused = false;
        queue.notify.notify_one();
        info!("Resumed queue for session {}", session_id);
        Ok(())
    }

    /// Point-in-time statistics for a session's queue.
    pub async fn stats(&self, session_id: SessionId) -> Result<QueueStats> {
        let queue = self.queue(session_id)?;
        let inner = queue.inner.lock().await;

        let terminal = inner.completed_jobs + inner.failed_jobs;
        Ok(QueueStats {
            total_jobs: inner.total_jobs,
            completed_jobs: inner.completed_jobs,
            failed_jobs: inner.failed_jobs,
            queued_jobs: inner.queued_jobs,
            average_job_duration_ms: if inner.completed_jobs > 0 {
                inner.total_duration_ms as f64 / inner.completed_jobs as f64
            } else {
                0.0
            },
            success_rate: if terminal > 0 {
                inner.completed_jobs as f64 / terminal as f64
            } else {
                0.0
            },
            paused: inner.paused,
            processing: inner.processing,
        })
    }

    /// Jobs still live in a session's queue (waiting or delayed).
    pub async fn pending_jobs(&self, session_id: SessionId) -> Result<Vec<ProcessingJob>> {
        let queue = self.queue(session_id)?;
        let inner = queue.inner.lock().await;
        Ok(inner.jobs.clone())
    }

    /// Stop every scheduler task. Queued jobs are dropped.
    pub async fn shutdown(&self) {
        for entry in self.queues.iter() {
            if let Some(handle) = entry.value().scheduler.lock().await.take() {
                handle.abort();
            }
        }
        info!("Job queue manager shut down");
    }

    async fn run_scheduler(self: Arc<Self>, queue: Arc<SessionQueue>) {
        loop {
            let decision = {
                let mut inner = queue.inner.lock().await;
                if inner.paused || inner.processing {
                    Decision::Sleep(None)
                } else {
                    match Self::select_job(&mut inner) {
                        Some(job) => Decision::Run(job),
                        None => Decision::Sleep(Self::next_wakeup(&inner)),
                    }
                }
            };

            match decision {
                Decision::Run(job) => {
                    self.execute_job(&queue, job).await;
                    // Something may have become eligible; look again at once.
                }
                Decision::Sleep(Some(delay)) => {
                    tokio::select! {
                        _ = queue.notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Decision::Sleep(None) => queue.notify.notified().await,
            }
        }
    }

    /// Deterministic selection: among jobs with `queued_at <= now` and all
    /// dependencies completed, the highest priority wins; ties break on the
    /// earliest `queued_at`. Marks the winner in-flight under the held lock.
    fn select_job(inner: &mut QueueInner) -> Option<ProcessingJob> {
        let now = Utc::now();
        let candidate = inner
            .jobs
            .iter()
            .filter(|job| {
                job.queued_at <= now
                    && job
                        .dependencies
                        .iter()
                        .all(|dep| inner.completed_ids.contains(dep))
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.queued_at.cmp(&a.queued_at))
            })?
            .id;

        inner.processing = true;
        let job = inner.jobs.iter_mut().find(|j| j.id == candidate)?;
        job.started_at = Some(now);
        Some(job.clone())
    }

    /// Delay until the earliest future `queued_at`, if any job is merely
    /// waiting out its backoff.
    fn next_wakeup(inner: &QueueInner) -> Option<std::time::Duration> {
        let now = Utc::now();
        inner
            .jobs
            .iter()
            .filter(|job| job.queued_at > now)
            .map(|job| job.queued_at)
            .min()
            .map(|at| {
                at.signed_duration_since(now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_millis(1))
            })
    }

    async fn execute_job(&self, queue: &Arc<SessionQueue>, mut job: ProcessingJob) {
        let session_id = queue.session_id;
        debug!(
            "Executing job {} ({}) for session {}",
            job.id, job.job_type, session_id
        );

        // First attempt creates the checkpoint; retries reuse it so the
        // whole retry history lives in one record.
        let checkpoint_id = match job.checkpoint_id {
            Some(id) => {
                if let Err(e) = self.checkpoints.mark_processing(session_id, id).await {
                    warn!("Job {} lost its checkpoint: {}", job.id, e);
                    self.finish_failed(queue, &job, &e.to_string()).await;
                    return;
                }
                id
            }
            None => {
                match self
                    .checkpoints
                    .create_checkpoint(
                        session_id,
                        job.step,
                        &job.job_type,
                        job.payload.clone(),
                        job.feature_id.clone(),
                        Some(job.max_retries),
                    )
                    .await
                {
                    Ok(checkpoint) => {
                        let id = checkpoint.id;
                        job.checkpoint_id = Some(id);
                        let mut inner = queue.inner.lock().await;
                        if let Some(live) = inner.jobs.iter_mut().find(|j| j.id == job.id) {
                            live.checkpoint_id = Some(id);
                        }
                        drop(inner);
                        if let Err(e) = self.checkpoints.mark_processing(session_id, id).await {
                            warn!("Job {} checkpoint vanished: {}", job.id, e);
                        }
                        id
                    }
                    Err(e) => {
                        warn!("Job {} cannot be checkpointed: {}", job.id, e);
                        self.finish_failed(queue, &job, &e.to_string()).await;
                        return;
                    }
                }
            }
        };

        match self.executor.execute(&job.job_type, &job.payload).await {
            Ok(result) => {
                if let Err(e) = self
                    .checkpoints
                    .record_success(session_id, checkpoint_id, Some(result))
                    .await
                {
                    warn!("Job {} result not recorded: {}", job.id, e);
                }
                self.finish_completed(queue, &job).await;
            }
            Err(message) => {
                let retries_left = job.retry_count + 1 < job.max_retries;
                if let Err(e) = self
                    .checkpoints
                    .record_failure(session_id, checkpoint_id, &message, retries_left)
                    .await
                {
                    warn!("Job {} failure not recorded: {}", job.id, e);
                }

                if retries_left {
                    self.requeue_with_backoff(queue, &job, &message).await;
                } else {
                    self.finish_failed(queue, &job, &message).await;
                }
            }
        }
    }

    async fn finish_completed(&self, queue: &Arc<SessionQueue>, job: &ProcessingJob) {
        let now = Utc::now();
        let mut inner = queue.inner.lock().await;
        inner.jobs.retain(|j| j.id != job.id);
        inner.completed_ids.insert(job.id);
        inner.completed_jobs += 1;
        inner.queued_jobs = inner.queued_jobs.saturating_sub(1);
        if let Some(started) = job.started_at {
            inner.total_duration_ms +=
                now.signed_duration_since(started).num_milliseconds().max(0) as u64;
        }
        inner.processing = false;
        drop(inner);

        info!("Job {} completed for session {}", job.id, queue.session_id);
    }

    async fn finish_failed(&self, queue: &Arc<SessionQueue>, job: &ProcessingJob, error: &str) {
        let mut inner = queue.inner.lock().await;
        inner.jobs.retain(|j| j.id != job.id);
        inner.failed_jobs += 1;
        inner.queued_jobs = inner.queued_jobs.saturating_sub(1);
        let orphaned = Self::drop_dependents(&mut inner, job.id);
        inner.processing = false;
        drop(inner);

        warn!(
            "Job {} dropped for session {} after {} attempts: {}",
            job.id,
            queue.session_id,
            job.retry_count + 1,
            error
        );
        for id in orphaned {
            warn!(
                "Job {} dropped for session {}: dependency {} failed",
                id, queue.session_id, job.id
            );
        }
    }

    /// A failed job never enters `completed_ids`, so jobs depending on it can
    /// never become eligible. Drop them, transitively, and count them failed.
    fn drop_dependents(inner: &mut QueueInner, failed: JobId) -> Vec<JobId> {
        let mut stack = vec![failed];
        let mut dropped = Vec::new();
        while let Some(dead) = stack.pop() {
            let dependents: Vec<JobId> = inner
                .jobs
                .iter()
                .filter(|j| j.dependencies.contains(&dead))
                .map(|j| j.id)
                .collect();
            for id in dependents {
                inner.jobs.retain(|j| j.id != id);
                inner.failed_jobs += 1;
                inner.queued_jobs = inner.queued_jobs.saturating_sub(1);
                stack.push(id);
                dropped.push(id);
            }
        }
        dropped
    }

    async fn requeue_with_backoff(
        &self,
        queue: &Arc<SessionQueue>,
        job: &ProcessingJob,
        error: &str,
    ) {
        let retry_count = job.retry_count + 1;
        let delay = retry_backoff(retry_count);
        let delayed_until =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        let mut inner = queue.inner.lock().await;
        if let Some(live) = inner.jobs.iter_mut().find(|j| j.id == job.id) {
            live.retry_count = retry_count;
            live.queued_at = delayed_until;
            live.started_at = None;
            live.failed_at = Some(Utc::now());
            live.last_error = Some(error.to_string());
            live.checkpoint_id = job.checkpoint_id;
        }
        inner.processing = false;
        drop(inner);

        warn!(
            "Job {} failed (attempt {}/{}), re-queued for {:?} from now",
            job.id, retry_count, job.max_retries, delay
        );
    }
}
