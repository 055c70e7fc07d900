//! # cvflow
//!
//! Resumable workflow engine for a CV-enhancement product. The engine tracks
//! a multi-step pipeline (upload → process → analyze → feature-generation →
//! template → preview → results) per user session, survives page reloads and
//! crashes, and resumes partially-completed asynchronous work without
//! duplicating side effects or losing progress.
//!
//! ## Architecture Overview
//!
//! The engine consists of four cooperating components:
//!
//! - **[`session`]**: the canonical session record, schema validation, and
//!   the document-store collaborator boundary
//! - **[`checkpoint`]**: durable checkpoints for long-running operations,
//!   with exponential-backoff automatic retries
//! - **[`queue`]**: per-session priority job queues with dependency-aware,
//!   single-flight scheduling
//! - **[`navigation`]**: accessible paths, breadcrumbs, completion
//!   percentage, resume recommendations, and restorable location strings
//!
//! [`engine::WorkflowEngine`] composes all four into one service object that
//! a process constructs at startup and injects wherever needed; the actual
//! long-running work (CV parsing, AI feature generation, media rendering)
//! happens behind the [`executor::JobExecutor`] collaborator trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cvflow::{EngineConfig, JobSpec, MemoryRepository, WorkflowEngine, WorkflowStep};
//! use cvflow::executor::JobExecutor;
//! use std::sync::Arc;
//!
//! struct Executor;
//!
//! #[async_trait::async_trait]
//! impl JobExecutor for Executor {
//!     async fn execute(
//!         &self,
//!         _function_name: &str,
//!         _parameters: &serde_json::Map<String, serde_json::Value>,
//!     ) -> Result<serde_json::Value, String> {
//!         Ok(serde_json::json!({"ok": true}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cvflow::EngineError> {
//!     let engine = WorkflowEngine::new(
//!         Arc::new(MemoryRepository::new()),
//!         Arc::new(Executor),
//!         EngineConfig::default(),
//!     );
//!
//!     let session = engine.start_session(None).await?;
//!     let mut payload = serde_json::Map::new();
//!     payload.insert("document_ref".into(), serde_json::json!("cv.pdf"));
//!     engine
//!         .enqueue_job(
//!             session.session_id,
//!             JobSpec::new("parse_cv", WorkflowStep::Processing).with_payload(payload),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

/// Session records, schema validation, and the persistence collaborator.
pub mod session;

/// Checkpoint lifecycle and exponential-backoff retry management.
pub mod checkpoint;

/// Per-session priority job queues with single-flight scheduling.
pub mod queue;

/// Navigation views, resume advice, and restorable location strings.
pub mod navigation;

/// Executor collaborator boundary with parameter validation.
pub mod executor;

/// Workflow step model: ordering, prerequisites, priorities, features.
pub mod workflow;

/// Engine facade composing every component.
pub mod engine;

pub mod error;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointManager, CheckpointState, ResumeOutcome,
};
pub use engine::{EngineConfig, EngineStatus, WorkflowEngine};
pub use error::{EngineError, Result};
pub use navigation::{
    Breadcrumb, CriticalIssue, NavigationAdvisor, NavigationHistory, NavigationState,
    ResumeRecommendation, StepAccess, decode_location, encode_location,
};
pub use queue::{JobQueueManager, JobSpec, ProcessingJob, QueueConfig, QueueStats};
pub use session::{
    FileRepository, MemoryRepository, SessionPatch, SessionRepository, SessionState, SessionStore,
    StepProgress, Substep, SubstepStatus,
};
pub use workflow::WorkflowStep;
