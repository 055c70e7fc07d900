use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Steps of the CV-enhancement pipeline, in workflow order.
///
/// The main sequence runs upload through results; `KeywordOptimization` is an
/// optional side step reachable once analysis has completed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Upload,
    Processing,
    Analysis,
    FeatureGeneration,
    KeywordOptimization,
    TemplateSelection,
    Preview,
    Results,
}

impl WorkflowStep {
    /// All steps, main sequence first, optional steps after their anchor.
    pub const ALL: [WorkflowStep; 8] = [
        WorkflowStep::Upload,
        WorkflowStep::Processing,
        WorkflowStep::Analysis,
        WorkflowStep::FeatureGeneration,
        WorkflowStep::KeywordOptimization,
        WorkflowStep::TemplateSelection,
        WorkflowStep::Preview,
        WorkflowStep::Results,
    ];

    /// The seven main-sequence steps that make up the core pipeline.
    pub const MAIN_SEQUENCE: [WorkflowStep; 7] = [
        WorkflowStep::Upload,
        WorkflowStep::Processing,
        WorkflowStep::Analysis,
        WorkflowStep::FeatureGeneration,
        WorkflowStep::TemplateSelection,
        WorkflowStep::Preview,
        WorkflowStep::Results,
    ];

    /// Static prerequisite set per step. The graph is acyclic by construction.
    pub fn prerequisites(&self) -> &'static [WorkflowStep] {
        match self {
            WorkflowStep::Upload => &[],
            WorkflowStep::Processing => &[WorkflowStep::Upload],
            WorkflowStep::Analysis => &[WorkflowStep::Processing],
            WorkflowStep::FeatureGeneration => &[WorkflowStep::Analysis],
            WorkflowStep::KeywordOptimization => &[WorkflowStep::Analysis],
            WorkflowStep::TemplateSelection => &[WorkflowStep::FeatureGeneration],
            WorkflowStep::Preview => &[WorkflowStep::TemplateSelection],
            WorkflowStep::Results => &[WorkflowStep::Preview],
        }
    }

    /// Base checkpoint priority for work belonging to this step.
    /// Earlier workflow steps score higher so recovery front-loads them.
    pub fn base_priority(&self) -> i32 {
        match self {
            WorkflowStep::Upload => 10,
            WorkflowStep::Processing => 9,
            WorkflowStep::Analysis => 8,
            WorkflowStep::FeatureGeneration => 7,
            WorkflowStep::KeywordOptimization => 6,
            WorkflowStep::TemplateSelection => 5,
            WorkflowStep::Preview => 4,
            WorkflowStep::Results => 3,
        }
    }

    /// Whether this step is part of the required main sequence.
    pub fn is_required(&self) -> bool {
        !matches!(self, WorkflowStep::KeywordOptimization)
    }

    /// URL path segment for this step.
    pub fn slug(&self) -> &'static str {
        match self {
            WorkflowStep::Upload => "upload",
            WorkflowStep::Processing => "processing",
            WorkflowStep::Analysis => "analysis",
            WorkflowStep::FeatureGeneration => "features",
            WorkflowStep::KeywordOptimization => "keywords",
            WorkflowStep::TemplateSelection => "template",
            WorkflowStep::Preview => "preview",
            WorkflowStep::Results => "results",
        }
    }

    /// Human-readable label used by breadcrumbs.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowStep::Upload => "Upload CV",
            WorkflowStep::Processing => "Processing",
            WorkflowStep::Analysis => "Analysis",
            WorkflowStep::FeatureGeneration => "Enhancements",
            WorkflowStep::KeywordOptimization => "Keyword Optimization",
            WorkflowStep::TemplateSelection => "Template",
            WorkflowStep::Preview => "Preview",
            WorkflowStep::Results => "Results",
        }
    }

    /// Parse the URL slug back into a step.
    pub fn from_slug(slug: &str) -> Option<WorkflowStep> {
        WorkflowStep::ALL.iter().copied().find(|s| s.slug() == slug)
    }

    /// Position in the main sequence, used for distance-based tie breaking.
    pub fn ordinal(&self) -> usize {
        WorkflowStep::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// Rough estimate of seconds a user needs to finish this step from scratch.
    pub fn estimated_secs(&self) -> u64 {
        match self {
            WorkflowStep::Upload => 60,
            WorkflowStep::Processing => 120,
            WorkflowStep::Analysis => 180,
            WorkflowStep::FeatureGeneration => 600,
            WorkflowStep::KeywordOptimization => 240,
            WorkflowStep::TemplateSelection => 120,
            WorkflowStep::Preview => 90,
            WorkflowStep::Results => 30,
        }
    }
}

/// Static catalog entry for one enhancement feature.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub id: &'static str,
    pub dependencies: &'static [&'static str],
    pub estimated_duration_secs: u64,
    pub complexity: u8,
    pub recommended: bool,
}

/// The enhancement features the product knows about. Dependencies are
/// feature-to-feature and acyclic; `create` seeds every session with this set.
pub const FEATURE_CATALOG: [FeatureSpec; 6] = [
    FeatureSpec {
        id: "skill_gap_analysis",
        dependencies: &[],
        estimated_duration_secs: 90,
        complexity: 2,
        recommended: true,
    },
    FeatureSpec {
        id: "cover_letter",
        dependencies: &[],
        estimated_duration_secs: 120,
        complexity: 2,
        recommended: true,
    },
    FeatureSpec {
        id: "keyword_optimization",
        dependencies: &["skill_gap_analysis"],
        estimated_duration_secs: 150,
        complexity: 3,
        recommended: true,
    },
    FeatureSpec {
        id: "interview_prep",
        dependencies: &["skill_gap_analysis"],
        estimated_duration_secs: 300,
        complexity: 3,
        recommended: false,
    },
    FeatureSpec {
        id: "portfolio_gallery",
        dependencies: &[],
        estimated_duration_secs: 240,
        complexity: 3,
        recommended: false,
    },
    FeatureSpec {
        id: "video_introduction",
        dependencies: &["cover_letter"],
        estimated_duration_secs: 900,
        complexity: 5,
        recommended: false,
    },
];

/// Operations whose checkpoints may be skipped when the user moves on.
/// Limited to long-form media generation that is never on the critical path.
pub const SKIPPABLE_OPERATIONS: [&str; 2] = ["generate_video_introduction", "render_portfolio_media"];

/// Function names tagged critical get a +5 priority bump, optional ones -5.
pub fn priority_adjustment(function_name: &str) -> i32 {
    const CRITICAL: [&str; 3] = ["parse_cv", "extract_cv_data", "analyze_cv"];
    if CRITICAL.contains(&function_name) {
        5
    } else if SKIPPABLE_OPERATIONS.contains(&function_name) {
        -5
    } else {
        0
    }
}

/// Check a prerequisite set against a completed-step set.
pub fn prerequisites_met(step: WorkflowStep, completed: &HashSet<WorkflowStep>) -> bool {
    step.prerequisites().iter().all(|p| completed.contains(p))
}
