use crate::navigation::location::encode_location;
use crate::navigation::types::{
    Breadcrumb, CriticalIssue, IssueKind, ResumeRecommendation, StepAccess,
};
use crate::session::types::SessionState;
use crate::workflow::{WorkflowStep, prerequisites_met};
use tracing::debug;
use url::Url;

/// Weight of the main sequence in the completion percentage; the rest comes
/// from optional-step and feature bonuses.
const MAIN_SEQUENCE_WEIGHT: f64 = 80.0;
const OPTIONAL_STEP_BONUS: f64 = 10.0;
const FEATURE_BONUS_EACH: f64 = 2.0;
const FEATURE_BONUS_CAP: f64 = 10.0;

/// Derives navigation views from session state: accessible paths,
/// breadcrumbs, completion, outstanding issues, and resume suggestions.
/// Read-only; every method takes the state snapshot it should judge.
pub struct NavigationAdvisor {
    base_url: Url,
}

impl NavigationAdvisor {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn step_url(&self, state: &SessionState, step: WorkflowStep) -> String {
        encode_location(&self.base_url, state.session_id, step, None, None)
    }

    /// A step is accessible iff every prerequisite is completed.
    pub fn accessible_paths(&self, state: &SessionState) -> Vec<StepAccess> {
        WorkflowStep::ALL
            .iter()
            .map(|&step| {
                let accessible = prerequisites_met(step, &state.completed_steps);
                let mut warnings = Vec::new();
                if !accessible {
                    let missing: Vec<&str> = step
                        .prerequisites()
                        .iter()
                        .filter(|p| !state.completed_steps.contains(p))
                        .map(|p| p.label())
                        .collect();
                    warnings.push(format!("Complete {} first", missing.join(", ")));
                }
                if self.has_terminal_failure(state, step) {
                    warnings.push("A processing step failed and needs attention".to_string());
                }

                StepAccess {
                    step,
                    url: self.step_url(state, step),
                    accessible,
                    completed: state.completed_steps.contains(&step),
                    required: step.is_required(),
                    warnings,
                }
            })
            .collect()
    }

    /// Overall completion: main-sequence steps share 80 % pro-rated by their
    /// own completion, optional steps add a fixed bonus once completed, and
    /// enabled features add a small capped bonus. Clamped to 100.
    pub fn completion_percentage(&self, state: &SessionState) -> f64 {
        let per_step = MAIN_SEQUENCE_WEIGHT / WorkflowStep::MAIN_SEQUENCE.len() as f64;

        let main: f64 = WorkflowStep::MAIN_SEQUENCE
            .iter()
            .map(|step| {
                let completion = if state.completed_steps.contains(step) {
                    100.0
                } else {
                    state
                        .step_progress
                        .get(step)
                        .map(|p| p.completion as f64)
                        .unwrap_or(0.0)
                };
                per_step * completion / 100.0
            })
            .sum();

        let optional: f64 = WorkflowStep::ALL
            .iter()
            .filter(|s| !s.is_required() && state.completed_steps.contains(s))
            .count() as f64
            * OPTIONAL_STEP_BONUS;

        let features = (state.feature_states.values().filter(|f| f.enabled).count() as f64
            * FEATURE_BONUS_EACH)
            .min(FEATURE_BONUS_CAP);

        (main + optional + features).min(100.0)
    }

    /// Aggregate outstanding problems into a human-readable list. The
    /// workflow stays navigable regardless; this never fails.
    pub fn critical_issues(&self, state: &SessionState) -> Vec<CriticalIssue> {
        let mut issues = Vec::new();

        for checkpoint in &state.processing_checkpoints {
            if checkpoint.is_terminal_failure() {
                let error = checkpoint
                    .error_recovery
                    .as_ref()
                    .map(|r| r.last_error.clone())
                    .unwrap_or_default();
                issues.push(CriticalIssue {
                    step: Some(checkpoint.step),
                    kind: IssueKind::FailedCheckpoint,
                    message: format!(
                        "{} failed permanently: {}",
                        checkpoint.function_name, error
                    ),
                });
            }
        }

        for problem in state.integrity_issues() {
            issues.push(CriticalIssue {
                step: None,
                kind: IssueKind::ValidationFailure,
                message: problem,
            });
        }

        // Everything past upload needs the captured CV data.
        if state.current_step != WorkflowStep::Upload && state.form_data.is_null() {
            issues.push(CriticalIssue {
                step: Some(state.current_step),
                kind: IssueKind::MissingData,
                message: "No CV data captured for the current step".to_string(),
            });
        }

        issues
    }

    /// One breadcrumb per step in `completed_steps ∪ {current_step}`, in
    /// workflow order, each annotated with accessibility.
    pub fn breadcrumbs(&self, state: &SessionState) -> Vec<Breadcrumb> {
        let mut steps: Vec<WorkflowStep> = state.completed_steps.iter().copied().collect();
        if !steps.contains(&state.current_step) {
            steps.push(state.current_step);
        }
        steps.sort_by_key(|s| s.ordinal());

        steps
            .into_iter()
            .map(|step| Breadcrumb {
                id: format!("{}-{}", state.session_id, step.slug()),
                label: step.label().to_string(),
                url: self.step_url(state, step),
                step,
                completed: state.completed_steps.contains(&step),
                accessible: prerequisites_met(step, &state.completed_steps),
            })
            .collect()
    }

    /// Score resume candidates from completion rate, blockers, and time
    /// already invested; ties resolve to the candidate closest to the
    /// current step.
    pub fn suggest_resume_point(&self, state: &SessionState) -> ResumeRecommendation {
        let mut candidates: Vec<WorkflowStep> = Vec::new();

        candidates.push(state.current_step);
        if let Some(next) = WorkflowStep::MAIN_SEQUENCE
            .iter()
            .find(|s| {
                !state.completed_steps.contains(s)
                    && prerequisites_met(**s, &state.completed_steps)
            })
            .copied()
        {
            if !candidates.contains(&next) {
                candidates.push(next);
            }
        }
        for checkpoint in &state.processing_checkpoints {
            if checkpoint.is_terminal_failure() && !candidates.contains(&checkpoint.step) {
                candidates.push(checkpoint.step);
            }
        }

        let current_ordinal = state.current_step.ordinal() as i64;
        let mut best: Option<(WorkflowStep, f64)> = None;
        for step in candidates {
            if !prerequisites_met(step, &state.completed_steps) {
                continue;
            }
            let score = self.candidate_score(state, step);
            let better = match best {
                None => true,
                Some((best_step, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && (step.ordinal() as i64 - current_ordinal).abs()
                                < (best_step.ordinal() as i64 - current_ordinal).abs())
                }
            };
            if better {
                best = Some((step, score));
            }
        }

        let (step, confidence) = best.unwrap_or((state.current_step, 0.5));
        let recommendation = ResumeRecommendation {
            step,
            reason: self.build_reason(state, step),
            confidence: confidence.min(1.0),
            estimated_secs_to_complete: self.remaining_secs(state, step),
        };
        debug!(
            "Resume suggestion for {}: {:?} ({:.2})",
            state.session_id, recommendation.step, recommendation.confidence
        );
        recommendation
    }

    fn candidate_score(&self, state: &SessionState, step: WorkflowStep) -> f64 {
        let mut score = 0.3;

        // Time already invested: resuming mid-step beats starting cold.
        let completion = state
            .step_progress
            .get(&step)
            .map(|p| p.completion as f64 / 100.0)
            .unwrap_or(0.0);
        if !state.completed_steps.contains(&step) {
            score += 0.3 * completion;
        }

        if step == state.current_step {
            score += 0.2;
        }
        if self.has_terminal_failure(state, step) {
            score += 0.15;
        }
        score
    }

    fn build_reason(&self, state: &SessionState, step: WorkflowStep) -> String {
        let mut reasons = Vec::new();
        if self.has_terminal_failure(state, step) {
            reasons.push("a processing step here failed and needs attention".to_string());
        }
        if let Some(progress) = state.step_progress.get(&step)
            && progress.completion > 0
            && !state.completed_steps.contains(&step)
        {
            reasons.push(format!("{}% already done", progress.completion));
        }
        if step == state.current_step {
            reasons.push("you were working here".to_string());
        }
        if reasons.is_empty() {
            reasons.push("next incomplete step in the workflow".to_string());
        }
        reasons.join(", ")
    }

    fn remaining_secs(&self, state: &SessionState, step: WorkflowStep) -> u64 {
        state
            .step_progress
            .get(&step)
            .map(|p| p.estimated_secs_to_complete)
            .unwrap_or_else(|| step.estimated_secs())
    }

    fn has_terminal_failure(&self, state: &SessionState, step: WorkflowStep) -> bool {
        state
            .processing_checkpoints
            .iter()
            .any(|c| c.step == step && c.is_terminal_failure())
    }
}
