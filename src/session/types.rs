use crate::checkpoint::types::Checkpoint;
use crate::workflow::{FEATURE_CATALOG, WorkflowStep, prerequisites_met};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Unique session identifier
pub type SessionId = Uuid;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Canonical record of one user's enhancement workflow instance.
///
/// Created on first workflow entry, mutated by the checkpoint manager and
/// UI-driven progress updates, never deleted by the engine (retention policy
/// is owned by the embedding product).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub current_step: WorkflowStep,
    pub completed_steps: HashSet<WorkflowStep>,
    pub schema_version: u32,
    pub step_progress: HashMap<WorkflowStep, StepProgress>,
    pub feature_states: HashMap<String, FeatureState>,
    pub processing_checkpoints: Vec<Checkpoint>,
    /// Opaque form data captured at session creation.
    pub form_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-step progress record. Substeps are owned exclusively by their step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    /// 0..=100
    pub completion: u8,
    pub time_spent_secs: u64,
    pub substeps: Vec<Substep>,
    pub estimated_secs_to_complete: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substep {
    pub id: String,
    pub name: String,
    pub status: SubstepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubstepStatus {
    Pending,
    InProgress,
    Completed,
}

/// State of one enhancement feature within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureState {
    pub enabled: bool,
    pub configuration: serde_json::Map<String, serde_json::Value>,
    pub progress: FeatureProgress,
    pub dependencies: HashSet<String>,
    pub user_preferences: UserPreferences,
    pub metadata: FeatureMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeatureProgress {
    pub completed: bool,
    pub current_subtask: Option<String>,
    /// 0..=100
    pub percent_complete: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub priority: i32,
    pub recommended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMetadata {
    pub estimated_duration_secs: u64,
    pub complexity: u8,
}

/// A patch applied to a session record. Absent fields are left untouched;
/// present fields replace the previous value wholesale (last-writer-wins at
/// record granularity, no field-level merge beyond what the caller patches).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub current_step: Option<WorkflowStep>,
    pub step_progress: Option<HashMap<WorkflowStep, StepProgress>>,
    pub feature_states: Option<HashMap<String, FeatureState>>,
    pub form_data: Option<serde_json::Value>,
}

impl SessionState {
    /// Initialize a fresh session: zero completion and empty substeps per
    /// step, every catalog feature disabled with its static dependency list.
    pub fn new(initial_form_data: Option<serde_json::Value>) -> Self {
        let now = Utc::now();

        let step_progress = WorkflowStep::ALL
            .iter()
            .map(|&step| {
                (
                    step,
                    StepProgress {
                        completion: 0,
                        time_spent_secs: 0,
                        substeps: Vec::new(),
                        estimated_secs_to_complete: step.estimated_secs(),
                    },
                )
            })
            .collect();

        let feature_states = FEATURE_CATALOG
            .iter()
            .map(|spec| {
                (
                    spec.id.to_string(),
                    FeatureState {
                        enabled: false,
                        configuration: serde_json::Map::new(),
                        progress: FeatureProgress::default(),
                        dependencies: spec.dependencies.iter().map(|d| d.to_string()).collect(),
                        user_preferences: UserPreferences {
                            priority: spec.complexity as i32,
                            recommended: spec.recommended,
                        },
                        metadata: FeatureMetadata {
                            estimated_duration_secs: spec.estimated_duration_secs,
                            complexity: spec.complexity,
                        },
                    },
                )
            })
            .collect();

        Self {
            session_id: Uuid::new_v4(),
            current_step: WorkflowStep::Upload,
            completed_steps: HashSet::new(),
            schema_version: CURRENT_SCHEMA_VERSION,
            step_progress,
            feature_states,
            processing_checkpoints: Vec::new(),
            form_data: initial_form_data.unwrap_or(serde_json::Value::Null),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this step may be marked completed right now.
    pub fn can_complete(&self, step: WorkflowStep) -> bool {
        prerequisites_met(step, &self.completed_steps)
    }

    pub fn checkpoint(&self, checkpoint_id: Uuid) -> Option<&Checkpoint> {
        self.processing_checkpoints
            .iter()
            .find(|c| c.id == checkpoint_id)
    }

    pub fn checkpoint_mut(&mut self, checkpoint_id: Uuid) -> Option<&mut Checkpoint> {
        self.processing_checkpoints
            .iter_mut()
            .find(|c| c.id == checkpoint_id)
    }

    /// Apply a partial update, bumping `updated_at`.
    pub fn apply_patch(&mut self, patch: SessionPatch) {
        if let Some(step) = patch.current_step {
            self.current_step = step;
        }
        if let Some(progress) = patch.step_progress {
            self.step_progress.extend(progress);
        }
        if let Some(features) = patch.feature_states {
            self.feature_states.extend(features);
        }
        if let Some(form_data) = patch.form_data {
            self.form_data = form_data;
        }
        self.updated_at = Utc::now();
    }

    /// Total seconds the user has invested across all steps.
    pub fn total_time_spent_secs(&self) -> u64 {
        self.step_progress.values().map(|p| p.time_spent_secs).sum()
    }

    /// Structural validation applied on every load. Failures surface as
    /// `CorruptedSessionData`; records are never silently repaired.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, CURRENT_SCHEMA_VERSION
            ));
        }
        for (step, progress) in &self.step_progress {
            if progress.completion > 100 {
                return Err(format!(
                    "step {:?} completion {} out of range",
                    step, progress.completion
                ));
            }
        }
        for (id, feature) in &self.feature_states {
            if feature.progress.percent_complete > 100 {
                return Err(format!("feature {} percent_complete out of range", id));
            }
        }
        for checkpoint in &self.processing_checkpoints {
            if checkpoint.session_id != self.session_id {
                return Err(format!(
                    "checkpoint {} belongs to session {}",
                    checkpoint.id, checkpoint.session_id
                ));
            }
            if let Some(recovery) = &checkpoint.error_recovery
                && recovery.retry_count > recovery.max_retries
            {
                return Err(format!(
                    "checkpoint {} retry_count {} exceeds max_retries {}",
                    checkpoint.id, recovery.retry_count, recovery.max_retries
                ));
            }
        }
        Ok(())
    }

    /// Non-fatal integrity issues, for diagnostics rather than load gating.
    pub fn integrity_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for step in &self.completed_steps {
            if !prerequisites_met(*step, &self.completed_steps) {
                issues.push(format!(
                    "step {:?} is marked completed with unmet prerequisites",
                    step
                ));
            }
        }

        for (id, feature) in &self.feature_states {
            for dep in &feature.dependencies {
                if !self.feature_states.contains_key(dep) {
                    issues.push(format!("feature {} depends on unknown feature {}", id, dep));
                }
            }
        }

        let checkpoint_ids: HashSet<Uuid> =
            self.processing_checkpoints.iter().map(|c| c.id).collect();
        for checkpoint in &self.processing_checkpoints {
            for dep in &checkpoint.dependencies {
                if !checkpoint_ids.contains(dep) {
                    issues.push(format!(
                        "checkpoint {} depends on unknown checkpoint {}",
                        checkpoint.id, dep
                    ));
                }
            }
        }

        issues
    }
}

impl StepProgress {
    /// Start a substep, adding it if the id is new.
    pub fn start_substep(&mut self, id: &str, name: &str) {
        let now = Utc::now();
        if let Some(substep) = self.substeps.iter_mut().find(|s| s.id == id) {
            if substep.status == SubstepStatus::Pending {
                substep.status = SubstepStatus::InProgress;
                substep.started_at = Some(now);
            }
        } else {
            self.substeps.push(Substep {
                id: id.to_string(),
                name: name.to_string(),
                status: SubstepStatus::InProgress,
                started_at: Some(now),
                completed_at: None,
            });
        }
    }

    /// Complete a substep and recompute step completion from the substep
    /// ratio. Completion never decreases from substep transitions.
    pub fn complete_substep(&mut self, id: &str) -> bool {
        let Some(substep) = self.substeps.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if substep.status != SubstepStatus::Completed {
            substep.status = SubstepStatus::Completed;
            substep.completed_at = Some(Utc::now());
        }

        let completed = self
            .substeps
            .iter()
            .filter(|s| s.status == SubstepStatus::Completed)
            .count();
        let ratio = (completed * 100 / self.substeps.len().max(1)) as u8;
        self.completion = self.completion.max(ratio);
        true
    }
}
