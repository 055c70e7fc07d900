use crate::checkpoint::types::{
    Checkpoint, CheckpointId, CheckpointState, ErrorRecovery, retry_backoff,
};
use crate::error::{EngineError, Result};
use crate::executor::{JobExecutor, validate_parameters};
use crate::session::store::SessionStore;
use crate::session::types::SessionId;
use crate::workflow::{SKIPPABLE_OPERATIONS, WorkflowStep, priority_adjustment};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for checkpoint lifecycle and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub default_max_retries: u32,
    /// Completed checkpoints older than this are eligible for pruning.
    pub retention_hours: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retention_hours: 24,
        }
    }
}

/// Outcome of a resume attempt.
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// The operation finished; the checkpoint is completed.
    Completed(serde_json::Value),
    /// The attempt failed transiently; another attempt is scheduled.
    RetryScheduled {
        error: String,
        next_retry_at: chrono::DateTime<Utc>,
    },
}

/// Partial update for a checkpoint. Absent fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub state: Option<CheckpointState>,
    pub progress: Option<u8>,
    pub partial_results: Option<serde_json::Value>,
}

/// Outcome of one executor attempt, after it has been folded into the
/// session record.
enum AttemptOutcome {
    Completed(serde_json::Value),
    Retry {
        error: String,
        retry_count: u32,
        next_retry_at: chrono::DateTime<Utc>,
    },
    Exhausted {
        max_retries: u32,
        last_error: String,
    },
}

/// Creates and advances checkpoints for long-running operations, driving
/// exponential-backoff retries through the executor collaborator.
///
/// Executor errors never escape uncaught: every failure becomes a checkpoint
/// state transition plus a returned error description.
pub struct CheckpointManager {
    store: Arc<SessionStore>,
    executor: Arc<dyn JobExecutor>,
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<SessionStore>,
        executor: Arc<dyn JobExecutor>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Create a checkpoint for an operation that is about to run.
    ///
    /// Priority comes from the static per-step table, bumped ±5 for function
    /// names tagged critical/optional. `can_skip` holds only for the fixed
    /// allow-list of deferrable media operations. `max_retries` overrides the
    /// configured default retry budget when the caller carries its own.
    pub async fn create_checkpoint(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
        function_name: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
        feature_id: Option<String>,
        max_retries: Option<u32>,
    ) -> Result<Checkpoint> {
        validate_parameters(function_name, &parameters)?;

        let priority = step.base_priority() + priority_adjustment(function_name);
        let can_skip = SKIPPABLE_OPERATIONS.contains(&function_name);

        let checkpoint = Checkpoint::new(
            session_id,
            step,
            function_name.to_string(),
            parameters,
            feature_id,
            priority,
            can_skip,
            max_retries.unwrap_or(self.config.default_max_retries),
        );

        self.store
            .append_checkpoint(session_id, checkpoint.clone())
            .await?;
        debug!(
            "Created checkpoint {} for {} (priority {})",
            checkpoint.id, function_name, priority
        );
        Ok(checkpoint)
    }

    /// Apply a partial update; completion stamps end time and duration.
    pub async fn update_checkpoint(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
        update: CheckpointUpdate,
    ) -> Result<Checkpoint> {
        self.store
            .mutate(session_id, |state| {
                let checkpoint = state
                    .checkpoint_mut(checkpoint_id)
                    .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;

                if let Some(progress) = update.progress {
                    checkpoint.resume_data.progress = progress.min(100);
                }
                if let Some(partial) = update.partial_results {
                    checkpoint.resume_data.partial_results = Some(partial);
                }
                match update.state {
                    Some(CheckpointState::Completed) => checkpoint.mark_completed(),
                    Some(new_state) => checkpoint.state = new_state,
                    None => {}
                }
                Ok(checkpoint.clone())
            })
            .await
    }

    /// Resume a checkpoint: invoke the executor and fold the outcome back
    /// into the session record.
    ///
    /// On transient failure the next attempt is scheduled automatically at
    /// `now + min(2^retry_count * 1s, 30s)`. Once `retry_count` reaches
    /// `max_retries` the checkpoint is terminally failed and
    /// [`EngineError::MaxRetriesExceeded`] is returned instead.
    pub async fn resume_from_checkpoint(
        self: &Arc<Self>,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
    ) -> Result<ResumeOutcome> {
        match self.attempt(session_id, checkpoint_id).await? {
            AttemptOutcome::Completed(result) => {
                info!("Checkpoint {} completed", checkpoint_id);
                Ok(ResumeOutcome::Completed(result))
            }
            AttemptOutcome::Retry {
                error,
                retry_count,
                next_retry_at,
            } => {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager
                        .retry_until_settled(session_id, checkpoint_id, retry_count)
                        .await;
                });
                Ok(ResumeOutcome::RetryScheduled {
                    error,
                    next_retry_at,
                })
            }
            AttemptOutcome::Exhausted {
                max_retries,
                last_error,
            } => Err(EngineError::MaxRetriesExceeded {
                checkpoint_id,
                max_retries,
                last_error,
            }),
        }
    }

    /// One executor attempt: transition to `Processing`, invoke the
    /// executor, and fold the result back into the session record.
    async fn attempt(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
    ) -> Result<AttemptOutcome> {
        let checkpoint = self
            .store
            .mutate(session_id, |state| {
                let checkpoint = state
                    .checkpoint_mut(checkpoint_id)
                    .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;
                checkpoint.state = CheckpointState::Processing;
                Ok(checkpoint.clone())
            })
            .await?;

        validate_parameters(&checkpoint.function_name, &checkpoint.parameters)?;

        match self
            .executor
            .execute(&checkpoint.function_name, &checkpoint.parameters)
            .await
        {
            Ok(result) => {
                self.record_success(session_id, checkpoint_id, Some(result.clone()))
                    .await?;
                Ok(AttemptOutcome::Completed(result))
            }
            Err(message) => {
                let error = EngineError::ExecutorFailure {
                    function_name: checkpoint.function_name.clone(),
                    message,
                }
                .to_string();
                let updated = self
                    .record_failure(session_id, checkpoint_id, &error, true)
                    .await?;

                let Some(recovery) = updated.error_recovery.as_ref() else {
                    // record_failure always populates recovery; treat absence as terminal.
                    return Ok(AttemptOutcome::Exhausted {
                        max_retries: 0,
                        last_error: error,
                    });
                };

                match recovery.next_retry_at {
                    Some(next_retry_at) => {
                        warn!(
                            "Checkpoint {} failed (attempt {}/{}), retrying in {:?}",
                            checkpoint_id,
                            recovery.retry_count,
                            recovery.max_retries,
                            retry_backoff(recovery.retry_count)
                        );
                        Ok(AttemptOutcome::Retry {
                            error,
                            retry_count: recovery.retry_count,
                            next_retry_at,
                        })
                    }
                    None => {
                        warn!(
                            "Checkpoint {} exhausted {} retries",
                            checkpoint_id, recovery.max_retries
                        );
                        Ok(AttemptOutcome::Exhausted {
                            max_retries: recovery.max_retries,
                            last_error: error,
                        })
                    }
                }
            }
        }
    }

    /// Drives the automatic retries for one checkpoint: sleep out the
    /// backoff, attempt again, until the checkpoint completes or fails
    /// terminally. Runs as one spawned task per failing resume, never
    /// re-entering itself.
    async fn retry_until_settled(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
        mut retry_count: u32,
    ) {
        loop {
            tokio::time::sleep(retry_backoff(retry_count)).await;
            match self.attempt(session_id, checkpoint_id).await {
                Ok(AttemptOutcome::Completed(_)) => {
                    info!(
                        "Checkpoint {} completed after {} failed attempts",
                        checkpoint_id, retry_count
                    );
                    return;
                }
                Ok(AttemptOutcome::Retry {
                    retry_count: next, ..
                }) => retry_count = next,
                Ok(AttemptOutcome::Exhausted { .. }) => return,
                Err(e) => {
                    warn!(
                        "Automatic retry of checkpoint {} ended: {}",
                        checkpoint_id, e
                    );
                    return;
                }
            }
        }
    }

    /// Transition a checkpoint to `Processing`. Used by the queue when it
    /// starts a job attempt.
    pub(crate) async fn mark_processing(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
    ) -> Result<()> {
        self.store
            .mutate(session_id, |state| {
                let checkpoint = state
                    .checkpoint_mut(checkpoint_id)
                    .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;
                checkpoint.state = CheckpointState::Processing;
                Ok(())
            })
            .await
    }

    /// Record a successful attempt: completed, progress 100, timing stamped.
    pub(crate) async fn record_success(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
        result: Option<serde_json::Value>,
    ) -> Result<Checkpoint> {
        self.store
            .mutate(session_id, |state| {
                let checkpoint = state
                    .checkpoint_mut(checkpoint_id)
                    .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;
                if let Some(result) = result {
                    checkpoint.resume_data.partial_results = Some(result);
                }
                checkpoint.mark_completed();
                Ok(checkpoint.clone())
            })
            .await
    }

    /// Record a failed attempt. Increments `retry_count`; while retries
    /// remain and `schedule` is set, `next_retry_at` is stamped with the
    /// backoff deadline. At exhaustion the state is terminally `Failed` with
    /// no `next_retry_at`.
    pub(crate) async fn record_failure(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
        message: &str,
        schedule: bool,
    ) -> Result<Checkpoint> {
        self.store
            .mutate(session_id, |state| {
                let checkpoint = state
                    .checkpoint_mut(checkpoint_id)
                    .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;

                let default_max = checkpoint
                    .error_recovery
                    .as_ref()
                    .map(|r| r.max_retries)
                    .unwrap_or(3);
                let recovery = checkpoint.error_recovery.get_or_insert(ErrorRecovery {
                    retry_count: 0,
                    max_retries: default_max,
                    last_error: String::new(),
                    next_retry_at: None,
                });

                recovery.retry_count = (recovery.retry_count + 1).min(recovery.max_retries);
                recovery.last_error = message.to_string();
                recovery.next_retry_at = if schedule && recovery.retry_count < recovery.max_retries
                {
                    let delay = retry_backoff(recovery.retry_count);
                    Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
                } else {
                    None
                };

                checkpoint.state = CheckpointState::Failed;
                Ok(checkpoint.clone())
            })
            .await
    }

    /// Checkpoints in `Created` or `Failed` state: the candidates for manual
    /// or automatic resume.
    pub async fn resumable_checkpoints(&self, session_id: SessionId) -> Result<Vec<Checkpoint>> {
        let state = self.store.get(session_id).await?;
        Ok(state
            .processing_checkpoints
            .iter()
            .filter(|c| c.is_resumable())
            .cloned()
            .collect())
    }

    /// Prune completed checkpoints from the session record. Storage hygiene,
    /// not correctness.
    pub async fn clear_completed_checkpoints(&self, session_id: SessionId) -> Result<usize> {
        let removed = self
            .store
            .mutate(session_id, |state| {
                let before = state.processing_checkpoints.len();
                state
                    .processing_checkpoints
                    .retain(|c| c.state != CheckpointState::Completed);
                Ok(before - state.processing_checkpoints.len())
            })
            .await?;

        if removed > 0 {
            info!("Cleared {} completed checkpoints from {}", removed, session_id);
        }
        Ok(removed)
    }

    /// Remove completed checkpoints older than the retention window.
    pub async fn prune_expired_checkpoints(&self, session_id: SessionId) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.retention_hours as i64);
        let removed = self
            .store
            .mutate(session_id, |state| {
                let before = state.processing_checkpoints.len();
                state.processing_checkpoints.retain(|c| {
                    !(c.state == CheckpointState::Completed
                        && c.performance.end_time.is_some_and(|t| t < cutoff))
                });
                Ok(before - state.processing_checkpoints.len())
            })
            .await?;

        if removed > 0 {
            info!("Pruned {} expired checkpoints from {}", removed, session_id);
        }
        Ok(removed)
    }
}
