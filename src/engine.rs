//! High-level composition of the workflow engine.
//!
//! [`WorkflowEngine`] is the one service object a process constructs at
//! startup and passes by reference wherever the engine is needed. There is
//! no global mutable state: the store, checkpoint manager, queue manager,
//! and navigation advisor are all owned here and injected with the
//! repository and executor collaborators the embedder supplies.

use crate::checkpoint::manager::{CheckpointConfig, CheckpointManager, ResumeOutcome};
use crate::checkpoint::types::{Checkpoint, CheckpointId};
use crate::error::Result;
use crate::executor::JobExecutor;
use crate::navigation::advisor::NavigationAdvisor;
use crate::navigation::history::NavigationHistory;
use crate::navigation::location::{decode_location, encode_location};
use crate::navigation::types::{
    Breadcrumb, CriticalIssue, NavigationState, ResumeRecommendation, StepAccess, Transition,
};
use crate::queue::manager::{JobQueueManager, QueueConfig};
use crate::queue::types::{JobId, JobSpec, QueueStats};
use crate::session::repository::SessionRepository;
use crate::session::store::SessionStore;
use crate::session::types::{SessionId, SessionPatch, SessionState};
use crate::workflow::WorkflowStep;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Unified configuration for the engine's components.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: Url,
    pub checkpoint: CheckpointConfig,
    pub queue: QueueConfig,
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://app.cvflow.example/enhance")
                .expect("static default base url is valid"),
            checkpoint: CheckpointConfig::default(),
            queue: QueueConfig::default(),
            history_limit: 50,
        }
    }
}

/// Aggregated view of one session for status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub session_id: SessionId,
    pub current_step: WorkflowStep,
    pub completion_percentage: f64,
    pub queue: QueueStats,
    pub resumable_checkpoints: usize,
    pub critical_issues: usize,
}

/// The resumable workflow engine: session store, checkpoint/retry manager,
/// per-session priority queues, and the navigation advisor, wired together.
pub struct WorkflowEngine {
    store: Arc<SessionStore>,
    checkpoints: Arc<CheckpointManager>,
    queues: Arc<JobQueueManager>,
    advisor: NavigationAdvisor,
    history: NavigationHistory,
    base_url: Url,
}

impl WorkflowEngine {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        executor: Arc<dyn JobExecutor>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(SessionStore::new(repository));
        let checkpoints = Arc::new(CheckpointManager::new(
            store.clone(),
            executor.clone(),
            config.checkpoint,
        ));
        let queues = Arc::new(JobQueueManager::new(
            checkpoints.clone(),
            executor,
            config.queue,
        ));
        let advisor = NavigationAdvisor::new(config.base_url.clone());
        let history = NavigationHistory::new(config.history_limit);

        info!("Workflow engine initialized");
        Self {
            store,
            checkpoints,
            queues,
            advisor,
            history,
            base_url: config.base_url,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    pub fn queues(&self) -> &Arc<JobQueueManager> {
        &self.queues
    }

    /// Create a session, its job queue, and the opening history entry.
    pub async fn start_session(
        &self,
        initial_form_data: Option<serde_json::Value>,
    ) -> Result<SessionState> {
        let state = self.store.create(initial_form_data).await?;
        self.queues.create_queue(state.session_id).await;

        let url = encode_location(
            &self.base_url,
            state.session_id,
            state.current_step,
            None,
            None,
        );
        self.history.push_history(NavigationState {
            session_id: state.session_id,
            step: state.current_step,
            substep: None,
            parameters: None,
            timestamp: Utc::now(),
            url,
            transition: Transition::Push,
        });

        Ok(state)
    }

    pub async fn session(&self, session_id: SessionId) -> Result<SessionState> {
        self.store.get(session_id).await
    }

    pub async fn apply_update(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> Result<SessionState> {
        self.store.apply_update(session_id, patch).await
    }

    pub async fn complete_step(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
    ) -> Result<SessionState> {
        self.store.mark_step_completed(session_id, step).await
    }

    /// Enqueue a job on the session's queue.
    pub async fn enqueue_job(&self, session_id: SessionId, spec: JobSpec) -> Result<JobId> {
        self.queues.enqueue(session_id, spec).await
    }

    pub async fn pause_processing(&self, session_id: SessionId) -> Result<()> {
        self.queues.pause(session_id).await
    }

    pub async fn resume_processing(&self, session_id: SessionId) -> Result<()> {
        self.queues.resume(session_id).await
    }

    /// Manually resume a checkpoint through the retry machinery.
    pub async fn resume_checkpoint(
        &self,
        session_id: SessionId,
        checkpoint_id: CheckpointId,
    ) -> Result<ResumeOutcome> {
        self.checkpoints
            .resume_from_checkpoint(session_id, checkpoint_id)
            .await
    }

    pub async fn resumable_checkpoints(&self, session_id: SessionId) -> Result<Vec<Checkpoint>> {
        self.checkpoints.resumable_checkpoints(session_id).await
    }

    pub async fn clear_completed_checkpoints(&self, session_id: SessionId) -> Result<usize> {
        self.checkpoints.clear_completed_checkpoints(session_id).await
    }

    // Navigation views.

    pub async fn accessible_paths(&self, session_id: SessionId) -> Result<Vec<StepAccess>> {
        let state = self.store.get(session_id).await?;
        Ok(self.advisor.accessible_paths(&state))
    }

    pub async fn completion_percentage(&self, session_id: SessionId) -> Result<f64> {
        let state = self.store.get(session_id).await?;
        Ok(self.advisor.completion_percentage(&state))
    }

    pub async fn critical_issues(&self, session_id: SessionId) -> Result<Vec<CriticalIssue>> {
        let state = self.store.get(session_id).await?;
        Ok(self.advisor.critical_issues(&state))
    }

    pub async fn breadcrumbs(&self, session_id: SessionId) -> Result<Vec<Breadcrumb>> {
        let state = self.store.get(session_id).await?;
        Ok(self.advisor.breadcrumbs(&state))
    }

    pub async fn suggest_resume_point(
        &self,
        session_id: SessionId,
    ) -> Result<ResumeRecommendation> {
        let state = self.store.get(session_id).await?;
        Ok(self.advisor.suggest_resume_point(&state))
    }

    /// Move the session to a step and record the transition in history.
    /// Returns the navigation state whose `url` restores this position.
    pub async fn navigate_to(
        &self,
        session_id: SessionId,
        step: WorkflowStep,
        substep: Option<&str>,
        parameters: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<NavigationState> {
        self.store
            .apply_update(
                session_id,
                SessionPatch {
                    current_step: Some(step),
                    ..Default::default()
                },
            )
            .await?;

        let url = encode_location(&self.base_url, session_id, step, substep, parameters.as_ref());
        let state = NavigationState {
            session_id,
            step,
            substep: substep.map(|s| s.to_string()),
            parameters,
            timestamp: Utc::now(),
            url,
            transition: Transition::Push,
        };
        self.history.push_history(state.clone());
        Ok(state)
    }

    /// Back navigation over the in-memory history stack.
    pub fn go_back(&self, session_id: SessionId) -> Option<NavigationState> {
        self.history.handle_back(session_id)
    }

    /// Rebuild a workflow position from an encoded location string.
    pub fn restore_location(&self, location: &str) -> Option<NavigationState> {
        decode_location(location)
    }

    /// Aggregated status for one session.
    pub async fn status(&self, session_id: SessionId) -> Result<EngineStatus> {
        let state = self.store.get(session_id).await?;
        let queue = self.queues.stats(session_id).await.unwrap_or_default();

        Ok(EngineStatus {
            session_id,
            current_step: state.current_step,
            completion_percentage: self.advisor.completion_percentage(&state),
            queue,
            resumable_checkpoints: state
                .processing_checkpoints
                .iter()
                .filter(|c| c.is_resumable())
                .count(),
            critical_issues: self.advisor.critical_issues(&state).len(),
        })
    }

    /// Stop all queue schedulers. Session records stay in the repository.
    pub async fn shutdown(&self) {
        self.queues.shutdown().await;
        info!("Workflow engine shut down");
    }
}
