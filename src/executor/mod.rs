//! # Executor Collaborator Boundary
//!
//! The engine never performs the long-running work itself (CV parsing, AI
//! feature generation, media rendering). It hands a `function_name` plus
//! validated parameters to a [`JobExecutor`] and only inspects the outcome.
//! Timeouts are the executor's responsibility.

use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// External collaborator that performs one long-running operation.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the operation identified by `function_name` with `parameters`.
    ///
    /// Errors are returned as plain messages; the engine wraps them into
    /// [`EngineError::ExecutorFailure`] and drives retry policy itself.
    async fn execute(
        &self,
        function_name: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, String>;
}

/// Required parameter keys per known operation, checked at the boundary
/// before the executor is invoked. Unknown function names pass through with
/// no schema; the executor owns their contract.
fn required_keys(function_name: &str) -> &'static [&'static str] {
    match function_name {
        "parse_cv" | "extract_cv_data" => &["document_ref"],
        "analyze_cv" => &["cv_id"],
        "generate_feature" => &["feature_id", "cv_id"],
        "optimize_keywords" => &["cv_id", "target_role"],
        "render_template" => &["cv_id", "template_id"],
        "generate_video_introduction" | "render_portfolio_media" => &["cv_id", "media_spec"],
        _ => &[],
    }
}

/// Validate parameters for an operation. Missing required keys fail fast so
/// malformed requests never reach the executor.
pub fn validate_parameters(
    function_name: &str,
    parameters: &Map<String, Value>,
) -> Result<(), EngineError> {
    let missing: Vec<&str> = required_keys(function_name)
        .iter()
        .copied()
        .filter(|key| !parameters.contains_key(*key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidParameters {
            function_name: function_name.to_string(),
            reason: format!("missing required keys: {}", missing.join(", ")),
        })
    }
}
