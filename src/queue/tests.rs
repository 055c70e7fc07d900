use crate::checkpoint::manager::{CheckpointConfig, CheckpointManager};
use crate::error::EngineError;
use crate::executor::JobExecutor;
use crate::queue::*;
use crate::session::repository::MemoryRepository;
use crate::session::store::SessionStore;
use crate::session::types::SessionId;
use crate::workflow::WorkflowStep;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Executor that records execution order and concurrency, with optional
/// per-operation failure scripting.
struct RecordingExecutor {
    log: Mutex<Vec<String>>,
    /// Remaining failures per function name.
    failures: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingExecutor {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn fail_times(self: Arc<Self>, function_name: &str, times: u32) -> Arc<Self> {
        self.failures
            .lock()
            .unwrap()
            .insert(function_name.to_string(), times);
        self
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, function_name: &str, _parameters: &Map<String, Value>) -> Result<Value, String> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        // Hold the slot long enough for overlap to be observable.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.log.lock().unwrap().push(function_name.to_string());
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(function_name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(format!("{} scripted failure", function_name));
        }
        Ok(json!({"function": function_name}))
    }
}

async fn setup(
    executor: Arc<RecordingExecutor>,
) -> (Arc<JobQueueManager>, Arc<SessionStore>, SessionId) {
    let store = Arc::new(SessionStore::new(Arc::new(MemoryRepository::new())));
    let checkpoints = Arc::new(CheckpointManager::new(
        store.clone(),
        executor.clone(),
        CheckpointConfig::default(),
    ));
    let manager = Arc::new(JobQueueManager::new(
        checkpoints,
        executor,
        QueueConfig::default(),
    ));

    let session = store.create(None).await.expect("create session");
    manager.create_queue(session.session_id).await;
    (manager, store, session.session_id)
}

/// Poll queue statistics until the predicate holds. Virtual time makes the
/// sleeps free under `start_paused`.
async fn wait_for(
    manager: &JobQueueManager,
    session_id: SessionId,
    predicate: impl Fn(&QueueStats) -> bool,
) -> QueueStats {
    for _ in 0..600 {
        let stats = manager.stats(session_id).await.expect("stats");
        if predicate(&stats) {
            return stats;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("queue never reached the expected state");
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_job_runs_first() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    // Enqueue while paused so both jobs are visible to one selection pass.
    manager.pause(session_id).await.expect("pause");
    manager
        .enqueue(
            session_id,
            JobSpec::new("background_op", WorkflowStep::Preview).with_priority(5),
        )
        .await
        .expect("enqueue low");
    manager
        .enqueue(
            session_id,
            JobSpec::new("urgent_op", WorkflowStep::Processing).with_priority(9),
        )
        .await
        .expect("enqueue high");
    manager.resume(session_id).await.expect("resume");

    wait_for(&manager, session_id, |s| s.completed_jobs == 2).await;
    assert_eq!(executor.log(), vec!["urgent_op", "background_op"]);
}

#[tokio::test(start_paused = true)]
async fn test_priority_tie_breaks_on_enqueue_order() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    manager.pause(session_id).await.expect("pause");
    for name in ["first_op", "second_op", "third_op"] {
        manager
            .enqueue(
                session_id,
                JobSpec::new(name, WorkflowStep::Preview).with_priority(7),
            )
            .await
            .expect("enqueue");
    }
    manager.resume(session_id).await.expect("resume");

    wait_for(&manager, session_id, |s| s.completed_jobs == 3).await;
    assert_eq!(executor.log(), vec!["first_op", "second_op", "third_op"]);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_run_single_flight() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    for name in ["op_a", "op_b", "op_c"] {
        manager
            .enqueue(session_id, JobSpec::new(name, WorkflowStep::Processing))
            .await
            .expect("enqueue");
    }

    wait_for(&manager, session_id, |s| s.completed_jobs == 3).await;
    assert_eq!(executor.max_concurrency(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dependency_gates_a_higher_priority_job() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    manager.pause(session_id).await.expect("pause");
    let parent = manager
        .enqueue(
            session_id,
            JobSpec::new("parent_op", WorkflowStep::Processing).with_priority(3),
        )
        .await
        .expect("enqueue parent");
    manager
        .enqueue(
            session_id,
            JobSpec::new("child_op", WorkflowStep::Processing)
                .with_priority(10)
                .with_dependencies(HashSet::from([parent])),
        )
        .await
        .expect("enqueue child");
    manager.resume(session_id).await.expect("resume");

    wait_for(&manager, session_id, |s| s.completed_jobs == 2).await;
    // child_op outranks parent_op but is ineligible until it completes.
    assert_eq!(executor.log(), vec!["parent_op", "child_op"]);
}

#[tokio::test(start_paused = true)]
async fn test_dependents_of_failed_jobs_are_dropped() {
    let executor = Arc::new(RecordingExecutor::new()).fail_times("parent_op", u32::MAX);
    let (manager, _store, session_id) = setup(executor.clone()).await;

    manager.pause(session_id).await.expect("pause");
    let parent = manager
        .enqueue(
            session_id,
            JobSpec::new("parent_op", WorkflowStep::Processing).with_max_retries(0),
        )
        .await
        .expect("enqueue parent");
    let child = manager
        .enqueue(
            session_id,
            JobSpec::new("child_op", WorkflowStep::Analysis)
                .with_dependencies(HashSet::from([parent])),
        )
        .await
        .expect("enqueue child");
    manager
        .enqueue(
            session_id,
            JobSpec::new("grandchild_op", WorkflowStep::FeatureGeneration)
                .with_dependencies(HashSet::from([child])),
        )
        .await
        .expect("enqueue grandchild");
    manager.resume(session_id).await.expect("resume");

    // The whole chain fails: the parent on its own attempt, the rest
    // because their dependency can never complete.
    let stats = wait_for(&manager, session_id, |s| s.failed_jobs == 3).await;
    assert_eq!(stats.completed_jobs, 0);
    assert_eq!(stats.queued_jobs, 0);
    assert_eq!(executor.log(), vec!["parent_op"]);
    assert!(
        manager
            .pending_jobs(session_id)
            .await
            .expect("pending")
            .is_empty()
    );
}

// Backoff eligibility is wall-clock, so the retry tests run in real time.
#[tokio::test]
async fn test_failed_job_retries_with_backoff_then_succeeds() {
    let executor = Arc::new(RecordingExecutor::new()).fail_times("flaky_op", 2);
    let (manager, store, session_id) = setup(executor.clone()).await;

    manager
        .enqueue(
            session_id,
            JobSpec::new("flaky_op", WorkflowStep::Analysis).with_max_retries(3),
        )
        .await
        .expect("enqueue");

    let stats = wait_for(&manager, session_id, |s| s.completed_jobs == 1).await;
    assert_eq!(stats.failed_jobs, 0);
    assert_eq!(executor.log().len(), 3);

    // All three attempts share one checkpoint, now completed.
    let state = store.get(session_id).await.expect("load session");
    assert_eq!(state.processing_checkpoints.len(), 1);
    let checkpoint = &state.processing_checkpoints[0];
    assert_eq!(checkpoint.state, crate::checkpoint::CheckpointState::Completed);
    let recovery = checkpoint.error_recovery.as_ref().expect("recovery");
    assert_eq!(recovery.retry_count, 2);
    assert!(recovery.next_retry_at.is_none());
}

#[tokio::test]
async fn test_exhausted_retries_drop_the_job() {
    let executor = Arc::new(RecordingExecutor::new()).fail_times("doomed_op", u32::MAX);
    let (manager, store, session_id) = setup(executor.clone()).await;

    manager
        .enqueue(
            session_id,
            JobSpec::new("doomed_op", WorkflowStep::Analysis).with_max_retries(2),
        )
        .await
        .expect("enqueue");

    let stats = wait_for(&manager, session_id, |s| s.failed_jobs == 1).await;
    assert_eq!(stats.completed_jobs, 0);
    assert_eq!(stats.queued_jobs, 0);
    assert_eq!(executor.log().len(), 2);

    // The job's retry budget carried over to its checkpoint, so exhaustion
    // leaves it terminally failed rather than merely behind on retries.
    let state = store.get(session_id).await.expect("load session");
    let checkpoint = &state.processing_checkpoints[0];
    assert!(checkpoint.is_terminal_failure());
    let recovery = checkpoint.error_recovery.as_ref().expect("recovery");
    assert_eq!(recovery.max_retries, 2);
    assert_eq!(recovery.retry_count, 2);
    assert!(recovery.next_retry_at.is_none());

    assert!(
        manager
            .pending_jobs(session_id)
            .await
            .expect("pending")
            .is_empty()
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_budget_means_single_attempt() {
    let executor = Arc::new(RecordingExecutor::new()).fail_times("one_shot_op", u32::MAX);
    let (manager, store, session_id) = setup(executor.clone()).await;

    manager
        .enqueue(
            session_id,
            JobSpec::new("one_shot_op", WorkflowStep::Analysis).with_max_retries(0),
        )
        .await
        .expect("enqueue");

    let stats = wait_for(&manager, session_id, |s| s.failed_jobs == 1).await;
    assert_eq!(stats.completed_jobs, 0);
    assert_eq!(executor.log().len(), 1);

    let state = store.get(session_id).await.expect("load session");
    assert!(state.processing_checkpoints[0].is_terminal_failure());
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_work_and_resume_releases_it() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    manager.pause(session_id).await.expect("pause");
    manager
        .enqueue(session_id, JobSpec::new("held_op", WorkflowStep::Processing))
        .await
        .expect("enqueue");

    // Give the scheduler every chance to (wrongly) pick the job up.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    let stats = manager.stats(session_id).await.expect("stats");
    assert!(stats.paused);
    assert_eq!(stats.completed_jobs, 0);
    assert_eq!(stats.queued_jobs, 1);
    assert!(executor.log().is_empty());

    manager.resume(session_id).await.expect("resume");
    wait_for(&manager, session_id, |s| s.completed_jobs == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_track_success_rate_and_duration() {
    let executor = Arc::new(RecordingExecutor::new()).fail_times("doomed_op", u32::MAX);
    let (manager, _store, session_id) = setup(executor.clone()).await;

    let initial = manager.stats(session_id).await.expect("stats");
    assert_eq!(initial.success_rate, 0.0);
    assert_eq!(initial.total_jobs, 0);

    manager
        .enqueue(session_id, JobSpec::new("good_op", WorkflowStep::Processing))
        .await
        .expect("enqueue");
    manager
        .enqueue(
            session_id,
            JobSpec::new("doomed_op", WorkflowStep::Analysis).with_max_retries(1),
        )
        .await
        .expect("enqueue");

    let stats = wait_for(&manager, session_id, |s| {
        s.completed_jobs == 1 && s.failed_jobs == 1
    })
    .await;
    assert_eq!(stats.total_jobs, 2);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.average_job_duration_ms >= 0.0);
}

#[tokio::test]
async fn test_job_spec_defaults_come_from_step() {
    let spec = JobSpec::new("render_op", WorkflowStep::TemplateSelection);
    assert_eq!(spec.priority, WorkflowStep::TemplateSelection.base_priority());
    assert_eq!(spec.max_retries, None);
    assert_eq!(spec.with_max_retries(0).max_retries, Some(0));

    let spec = JobSpec::new("render_op", WorkflowStep::TemplateSelection);
    let job = ProcessingJob::from_spec(spec.with_feature("cover_letter"), 3);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.feature_id.as_deref(), Some("cover_letter"));
    assert!(job.checkpoint_id.is_none());
}

#[tokio::test]
async fn test_unknown_session_has_no_queue() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, _session_id) = setup(executor).await;

    let result = manager
        .enqueue(
            uuid::Uuid::new_v4(),
            JobSpec::new("op", WorkflowStep::Upload),
        )
        .await;
    assert!(matches!(result, Err(EngineError::QueueNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_create_queue_is_idempotent() {
    let executor = Arc::new(RecordingExecutor::new());
    let (manager, _store, session_id) = setup(executor.clone()).await;

    // A second create must not reset counters or spawn a competing scheduler.
    manager.create_queue(session_id).await;
    manager
        .enqueue(session_id, JobSpec::new("op", WorkflowStep::Upload))
        .await
        .expect("enqueue");

    let stats = wait_for(&manager, session_id, |s| s.completed_jobs == 1).await;
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(executor.max_concurrency(), 1);

    manager.shutdown().await;
}
