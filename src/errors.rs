//! Typed error hierarchy for the Mend orchestrator.
//!
//! Two top-level enums cover the two failure domains:
//! - `PipelineError`: pipeline-level failures (pre-stage aborts, persistence,
//!   version control)
//! - `AgentError`: per-stage capability invocation failures
//!
//! Stage outcomes reporting `success: false` and build-verification failures
//! are ordinary results, not errors; only conditions that abort a flow are
//! modeled here.

use thiserror::Error;

/// Errors from the pipeline executor and its collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Working directory {path} does not exist")]
    WorkingDirMissing { path: std::path::PathBuf },

    #[error("Missing required environment variable {key}")]
    MissingCredential { key: String },

    #[error("Workflow {id} not found")]
    WorkflowNotFound { id: i64 },

    #[error("Invalid status transition {from} -> {to} for workflow {id}")]
    InvalidTransition {
        id: i64,
        from: String,
        to: String,
    },

    #[error("Git error: {0}")]
    Git(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single stage capability invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent command '{cmd}': {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read agent output stream: {source}")]
    StreamRead {
        #[source]
        source: std::io::Error,
    },

    #[error("Agent exited with non-zero code {exit_code}")]
    NonZeroExit { exit_code: i32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
