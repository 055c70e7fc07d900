use crate::workflow::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type CheckpointId = Uuid;

/// Durable record of one resumable attempt at a long-running operation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub session_id: Uuid,
    pub step: WorkflowStep,
    pub feature_id: Option<String>,
    /// Logical operation identifier handed to the executor collaborator.
    pub function_name: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub state: CheckpointState,
    pub resume_data: ResumeData,
    /// Checkpoint/job ids that must complete before this one may run.
    pub dependencies: HashSet<Uuid>,
    pub can_skip: bool,
    pub priority: i32,
    pub error_recovery: Option<ErrorRecovery>,
    pub performance: CheckpointPerformance,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Created,
    Processing,
    Completed,
    Failed,
}

/// Partial results carried across attempts.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ResumeData {
    pub partial_results: Option<serde_json::Value>,
    /// 0..=100
    pub progress: u8,
}

/// Retry bookkeeping. Present once the first failure has occurred.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorRecovery {
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: String,
    /// Set only while another automatic attempt is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointPerformance {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Backoff before the k-th retry (k >= 1): `min(2^k * 1000ms, 30s)`.
pub fn retry_backoff(retry_count: u32) -> std::time::Duration {
    let millis = 1000u64
        .saturating_mul(2u64.saturating_pow(retry_count.min(31)))
        .min(30_000);
    std::time::Duration::from_millis(millis)
}

impl Checkpoint {
    pub fn new(
        session_id: Uuid,
        step: WorkflowStep,
        function_name: String,
        parameters: serde_json::Map<String, serde_json::Value>,
        feature_id: Option<String>,
        priority: i32,
        can_skip: bool,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            step,
            feature_id,
            function_name,
            parameters,
            state: CheckpointState::Created,
            resume_data: ResumeData::default(),
            dependencies: HashSet::new(),
            can_skip,
            priority,
            error_recovery: Some(ErrorRecovery {
                retry_count: 0,
                max_retries,
                last_error: String::new(),
                next_retry_at: None,
            }),
            performance: CheckpointPerformance {
                start_time: Utc::now(),
                end_time: None,
                duration_ms: None,
            },
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        self.state == CheckpointState::Failed
            && self
                .error_recovery
                .as_ref()
                .is_some_and(|r| r.retry_count >= r.max_retries)
    }

    /// Candidates for manual or automatic resume.
    pub fn is_resumable(&self) -> bool {
        matches!(self.state, CheckpointState::Created | CheckpointState::Failed)
    }

    /// Stamp end time and duration on completion.
    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.state = CheckpointState::Completed;
        self.resume_data.progress = 100;
        self.performance.end_time = Some(now);
        self.performance.duration_ms = Some(
            now.signed_duration_since(self.performance.start_time)
                .num_milliseconds()
                .max(0) as u64,
        );
        if let Some(recovery) = &mut self.error_recovery {
            recovery.next_retry_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(retry_backoff(1).as_millis(), 2_000);
        assert_eq!(retry_backoff(2).as_millis(), 4_000);
        assert_eq!(retry_backoff(3).as_millis(), 8_000);
        assert_eq!(retry_backoff(4).as_millis(), 16_000);
        assert_eq!(retry_backoff(5).as_millis(), 30_000);
        assert_eq!(retry_backoff(30).as_millis(), 30_000);
    }

    #[test]
    fn test_completion_stamps_performance() {
        let mut checkpoint = Checkpoint::new(
            Uuid::new_v4(),
            WorkflowStep::Processing,
            "parse_cv".to_string(),
            serde_json::Map::new(),
            None,
            10,
            false,
            3,
        );
        checkpoint.mark_completed();

        assert_eq!(checkpoint.state, CheckpointState::Completed);
        assert_eq!(checkpoint.resume_data.progress, 100);
        assert!(checkpoint.performance.end_time.is_some());
        assert!(checkpoint.performance.duration_ms.is_some());
        assert!(checkpoint.error_recovery.unwrap().next_retry_at.is_none());
    }

    #[test]
    fn test_terminal_failure_requires_exhausted_retries() {
        let mut checkpoint = Checkpoint::new(
            Uuid::new_v4(),
            WorkflowStep::FeatureGeneration,
            "generate_feature".to_string(),
            serde_json::Map::new(),
            Some("cover_letter".to_string()),
            7,
            false,
            3,
        );
        checkpoint.state = CheckpointState::Failed;
        assert!(!checkpoint.is_terminal_failure());

        checkpoint.error_recovery.as_mut().unwrap().retry_count = 3;
        assert!(checkpoint.is_terminal_failure());
    }
}
