use crate::workflow::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type JobId = Uuid;

/// Specification for enqueueing a job; the queue assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Logical operation name handed to the executor.
    pub job_type: String,
    pub step: WorkflowStep,
    pub feature_id: Option<String>,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub priority: i32,
    pub dependencies: HashSet<JobId>,
    /// Attempt budget; `None` takes the queue default, `Some(0)` means a
    /// single attempt with no retries.
    pub max_retries: Option<u32>,
}

impl JobSpec {
    pub fn new(job_type: &str, step: WorkflowStep) -> Self {
        Self {
            job_type: job_type.to_string(),
            step,
            feature_id: None,
            payload: serde_json::Map::new(),
            priority: step.base_priority(),
            dependencies: HashSet::new(),
            max_retries: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: HashSet<JobId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_feature(mut self, feature_id: &str) -> Self {
        self.feature_id = Some(feature_id.to_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Queue-level unit of work, one-to-one with a checkpoint's execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: JobId,
    pub job_type: String,
    pub step: WorkflowStep,
    pub feature_id: Option<String>,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub priority: i32,
    pub dependencies: HashSet<JobId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Checkpoint backing this job, set on the first execution attempt.
    pub checkpoint_id: Option<Uuid>,
}

impl ProcessingJob {
    pub fn from_spec(spec: JobSpec, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: spec.job_type,
            step: spec.step,
            feature_id: spec.feature_id,
            payload: spec.payload,
            priority: spec.priority,
            dependencies: spec.dependencies,
            retry_count: 0,
            max_retries,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
            checkpoint_id: None,
        }
    }
}

/// Point-in-time statistics for one session's queue.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub queued_jobs: u64,
    /// Running mean over completed jobs.
    pub average_job_duration_ms: f64,
    /// completed / (completed + failed); 0.0 before any terminal job.
    pub success_rate: f64,
    pub paused: bool,
    pub processing: bool,
}
