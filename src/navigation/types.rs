use crate::session::types::SessionId;
use crate::workflow::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ephemeral snapshot of a workflow position. Reconstructable entirely from
/// the encoded location string; only the bounded per-session history list
/// retains it in memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationState {
    pub session_id: SessionId,
    pub step: WorkflowStep,
    pub substep: Option<String>,
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Push,
    Back,
}

/// Derived navigation trail entry for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: String,
    pub label: String,
    pub url: String,
    pub step: WorkflowStep,
    pub completed: bool,
    pub accessible: bool,
}

/// Per-step accessibility verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAccess {
    pub step: WorkflowStep,
    pub url: String,
    pub accessible: bool,
    pub completed: bool,
    pub required: bool,
    pub warnings: Vec<String>,
}

/// Where the user should pick the workflow back up, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRecommendation {
    pub step: WorkflowStep,
    pub reason: String,
    /// 0.0..=1.0
    pub confidence: f64,
    pub estimated_secs_to_complete: u64,
}

/// A problem that blocks or degrades the workflow, aggregated for display.
/// The workflow stays navigable with outstanding issues; nothing here throws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalIssue {
    pub step: Option<WorkflowStep>,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FailedCheckpoint,
    ValidationFailure,
    MissingData,
}
