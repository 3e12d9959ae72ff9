//! Stage capability binding.
//!
//! Each [`StageKind`] is bound to a capability implementation at registry
//! construction time, so the kind-to-capability mapping is exhaustive by
//! construction rather than resolved by name at dispatch time.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::{Artifact, StageKind, StageOutcome};

/// What a stage capability receives. This struct is also the persisted input
/// snapshot on the agent execution record; credentials are deliberately not
/// part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    pub workflow_id: i64,
    pub stage: StageKind,
    pub workflow_type: String,
    pub module_name: String,
    pub task_description: String,
    pub working_dir: String,
    pub branch_name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_artifacts: Vec<Artifact>,
}

/// A pluggable per-stage work capability.
///
/// Returning `Ok` with `success: false` and returning `Err` are both stage
/// failures to the executor; `Err` additionally carries the failure cause
/// into the execution record's error message.
#[async_trait]
pub trait StageAgent: Send + Sync {
    async fn invoke(&self, input: &StageInput) -> Result<StageOutcome, AgentError>;
}

/// One capability per stage kind, fixed at construction.
#[derive(Clone)]
pub struct AgentRegistry {
    plan: Arc<dyn StageAgent>,
    code: Arc<dyn StageAgent>,
    test: Arc<dyn StageAgent>,
    review: Arc<dyn StageAgent>,
    document: Arc<dyn StageAgent>,
    scaffold: Arc<dyn StageAgent>,
}

impl AgentRegistry {
    /// Bind the same capability to every stage kind.
    pub fn uniform(agent: Arc<dyn StageAgent>) -> Self {
        Self {
            plan: agent.clone(),
            code: agent.clone(),
            test: agent.clone(),
            review: agent.clone(),
            document: agent.clone(),
            scaffold: agent,
        }
    }

    /// Replace the capability bound to one stage kind.
    pub fn with_agent(mut self, kind: StageKind, agent: Arc<dyn StageAgent>) -> Self {
        match kind {
            StageKind::Plan => self.plan = agent,
            StageKind::Code => self.code = agent,
            StageKind::Test => self.test = agent,
            StageKind::Review => self.review = agent,
            StageKind::Document => self.document = agent,
            StageKind::Scaffold => self.scaffold = agent,
        }
        self
    }

    pub fn agent(&self, kind: StageKind) -> Arc<dyn StageAgent> {
        match kind {
            StageKind::Plan => self.plan.clone(),
            StageKind::Code => self.code.clone(),
            StageKind::Test => self.test.clone(),
            StageKind::Review => self.review.clone(),
            StageKind::Document => self.document.clone(),
            StageKind::Scaffold => self.scaffold.clone(),
        }
    }
}
