use crate::checkpoint::types::Checkpoint;
use crate::error::{EngineError, Result};
use crate::session::repository::SessionRepository;
use crate::session::types::{SessionId, SessionPatch, SessionState};
use crate::workflow::WorkflowStep;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Owner of the canonical session records.
///
/// Every mutation is an explicit read-modify-write under a per-session lock:
/// load, mutate in memory, save. Conflicts resolve last-writer-wins at
/// whole-record granularity, but two writers for the same session are always
/// ordered by the lock.
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            repository,
            locks: DashMap::new(),
        }
    }

    fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a new session record and persist it.
    pub async fn create(&self, initial_form_data: Option<serde_json::Value>) -> Result<SessionState> {
        let state = SessionState::new(initial_form_data);
        self.save(&state).await?;
        info!("Created session {}", state.session_id);
        Ok(state)
    }

    /// Fetch a session, validating the stored document.
    ///
    /// A record that fails schema validation surfaces as
    /// [`EngineError::CorruptedSessionData`] and is never silently repaired.
    pub async fn get(&self, session_id: SessionId) -> Result<SessionState> {
        let document = self
            .repository
            .load(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let state: SessionState =
            serde_json::from_value(document).map_err(|e| EngineError::CorruptedSessionData {
                session_id,
                reason: format!("deserialization failed: {}", e),
            })?;

        state
            .validate()
            .map_err(|reason| EngineError::CorruptedSessionData { session_id, reason })?;

        Ok(state)
    }

    async fn save(&self, state: &SessionState) -> Result<()> {
        let document = serde_json::to_value(state)?;
        self.repository.save(state.session_id, document).await
    }

    /// Read-modify-write a session under its lock.
    pub(crate) async fn mutate<T>(
        &self,
        session_id: SessionId,
        mutation: impl FnOnce(&mut SessionState) -> Result<T>,
    ) -> Result<T> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut state = self.get(session_id).await?;
        let outcome = mutation(&mut state)?;
        state.updated_at = chrono::Utc::now();
        self.save(&state).await?;
        Ok(outcome)
    }

    /// Apply a partial update; returns the record after the write.
    pub async fn apply_update(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            state.apply_patch(patch);
            Ok(state.clone())
        })
        .await
    }

    /// Mark a step completed after checking its static prerequisites.
    pub async fn mark_step_completed(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            if !state.can_complete(step) {
                let missing = step
                    .prerequisites()
                    .iter()
                    .filter(|p| !state.completed_steps.contains(p))
                    .map(|p| p.slug())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(EngineError::PrerequisiteNotMet {
                    step: step.slug().to_string(),
                    missing,
                });
            }
            state.completed_steps.insert(step);
            if let Some(progress) = state.step_progress.get_mut(&step) {
                progress.completion = 100;
                progress.estimated_secs_to_complete = 0;
            }
            debug!("Session {} completed step {:?}", session_id, step);
            Ok(state.clone())
        })
        .await
    }

    /// Append a checkpoint to the session record.
    pub async fn append_checkpoint(
        &self,
        session_id: SessionId,
        checkpoint: Checkpoint,
    ) -> Result<()> {
        self.mutate(session_id, |state| {
            state.processing_checkpoints.push(checkpoint);
            Ok(())
        })
        .await
    }

    /// Replace a checkpoint in place, matched by id.
    pub async fn replace_checkpoint(
        &self,
        session_id: SessionId,
        checkpoint: Checkpoint,
    ) -> Result<()> {
        let checkpoint_id = checkpoint.id;
        self.mutate(session_id, |state| {
            let slot = state
                .checkpoint_mut(checkpoint_id)
                .ok_or(EngineError::CheckpointNotFound(checkpoint_id))?;
            *slot = checkpoint;
            Ok(())
        })
        .await
    }

    /// Record progress on a step without completing it.
    pub async fn update_step_progress(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
        completion: u8,
        additional_time_secs: u64,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            let progress = state
                .step_progress
                .entry(step)
                .or_insert_with(|| crate::session::types::StepProgress {
                    completion: 0,
                    time_spent_secs: 0,
                    substeps: Vec::new(),
                    estimated_secs_to_complete: step.estimated_secs(),
                });
            progress.completion = completion.min(100);
            progress.time_spent_secs += additional_time_secs;
            Ok(state.clone())
        })
        .await
    }

    /// Start a substep within a step, creating it if new.
    pub async fn start_substep(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
        substep_id: &str,
        name: &str,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            if let Some(progress) = state.step_progress.get_mut(&step) {
                progress.start_substep(substep_id, name);
            }
            Ok(state.clone())
        })
        .await
    }

    /// Complete a substep; step completion is recomputed and never decreases.
    pub async fn complete_substep(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
        substep_id: &str,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            if let Some(progress) = state.step_progress.get_mut(&step)
                && !progress.complete_substep(substep_id)
            {
                warn!(
                    "Session {} has no substep {} in step {:?}",
                    session_id, substep_id, step
                );
            }
            Ok(state.clone())
        })
        .await
    }

    /// Toggle a feature for this session.
    pub async fn set_feature_enabled(
        &self,
        session_id: SessionId,
        feature_id: &str,
        enabled: bool,
    ) -> Result<SessionState> {
        self.mutate(session_id, |state| {
            if let Some(feature) = state.feature_states.get_mut(feature_id) {
                feature.enabled = enabled;
            } else {
                warn!("Session {} has no feature {}", session_id, feature_id);
            }
            Ok(state.clone())
        })
        .await
    }

    /// Diagnostic integrity report for a session.
    pub async fn validate_session(&self, session_id: SessionId) -> Result<Vec<String>> {
        let state = self.get(session_id).await?;
        Ok(state.integrity_issues())
    }
}
