//! Stage-loop executor for one workflow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::config::StageEnv;
use crate::db::DbHandle;
use crate::errors::PipelineError;
use crate::events::EventLogger;
use crate::interrupt::{BoundaryDecision, InterruptController};
use crate::models::{
    Artifact, ExecutionStatus, LogLevel, PipelineResult, StageKind, Workflow, WorkflowStatus,
};
use crate::stage::{AgentRegistry, StageInput};
use crate::vcs::{self, GitWorkspace};
use crate::verify::BuildVerifier;

use super::decompose::Decomposer;
use super::healing;

/// Accumulated output of one pipeline flow. Carried across the stage loop
/// and handed to the fix coordinator when the build gate trips, so a
/// resumed parent keeps its earlier artifacts.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoopState {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) summaries: Vec<String>,
    pub(crate) stage_failed: bool,
}

impl LoopState {
    pub(crate) fn into_result(self, success: bool) -> PipelineResult {
        PipelineResult {
            success,
            artifacts: self.artifacts,
            summary: self.summaries.join("\n"),
        }
    }
}

/// How a stage run ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StageFlow {
    Completed,
    /// A cancel signal stopped the flow at a boundary.
    Cancelled,
    /// The build gate tripped; a fix pipeline now owns the workflow.
    FixScheduled,
}

/// Whether the code stage's build gate applies. Fix pipelines verify on
/// their own schedule and run ungated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildGate {
    Enforce,
    Skip,
}

/// The `repo` subdirectory, when present, is the actual working tree
/// (clone-then-work layout). Substituted once per pipeline invocation.
pub(crate) fn resolve_working_dir(root: &Path) -> PathBuf {
    let repo = root.join("repo");
    if repo.is_dir() { repo } else { root.to_path_buf() }
}

#[derive(Clone)]
pub struct PipelineExecutor {
    pub(crate) db: DbHandle,
    pub(crate) registry: AgentRegistry,
    pub(crate) verifier: Arc<BuildVerifier>,
    pub(crate) interrupts: Arc<InterruptController>,
    pub(crate) events: EventLogger,
    pub(crate) decomposer: Decomposer,
}

impl PipelineExecutor {
    pub fn new(
        db: DbHandle,
        registry: AgentRegistry,
        verifier: BuildVerifier,
        interrupts: InterruptController,
        events: EventLogger,
        decomposer: Decomposer,
    ) -> Self {
        Self {
            db,
            registry,
            verifier: Arc::new(verifier),
            interrupts: Arc::new(interrupts),
            events,
            decomposer,
        }
    }

    /// Execute the workflow's stage sequence to its aggregate result.
    ///
    /// Never returns an error: anything uncaught inside the flow is
    /// converted at this boundary into a `success: false` result carrying
    /// whatever artifacts accumulated, and the workflow is finalized
    /// `failed`.
    pub async fn execute(&self, workflow_id: i64) -> PipelineResult {
        let events = self.events.for_run(Uuid::new_v4());
        let mut state = LoopState::default();
        match self.run(workflow_id, &mut state, &events).await {
            Ok(result) => result,
            Err(e) => {
                let chain = format!("{:#}", anyhow::Error::new(e));
                events
                    .log(
                        Some(workflow_id),
                        LogLevel::Error,
                        "pipeline_fatal",
                        &chain,
                        None,
                    )
                    .await;
                self.finalize_status(workflow_id, WorkflowStatus::Failed, &events)
                    .await;
                state.summaries.push(format!("fatal: {}", chain));
                state.into_result(false)
            }
        }
    }

    async fn run(
        &self,
        workflow_id: i64,
        state: &mut LoopState,
        events: &EventLogger,
    ) -> Result<PipelineResult, PipelineError> {
        let wf = self.load_workflow(workflow_id).await?;

        let root = Path::new(&wf.working_dir);
        if !root.is_dir() {
            return Err(PipelineError::WorkingDirMissing {
                path: root.to_path_buf(),
            });
        }
        let work_dir = resolve_working_dir(root);

        let stages = wf.sequence();
        // resolved for the whole sequence up front; a missing credential
        // aborts before any stage runs
        let envs = StageEnv::resolve_all(stages)?;

        let wf = {
            let id = wf.id;
            self.db
                .call(move |db| db.update_workflow_status(id, &WorkflowStatus::Running))
                .await
                .map_err(PipelineError::Database)?
        };
        events
            .log(
                Some(wf.id),
                LogLevel::Info,
                "pipeline_started",
                &format!("{} pipeline for module {}", wf.workflow_type, wf.module_name),
                Some(serde_json::json!({
                    "stages": stages.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                    "working_dir": work_dir.display().to_string(),
                    "started_at": chrono::Utc::now().to_rfc3339(),
                })),
            )
            .await;

        let flow = self
            .run_stages(&wf, stages, &envs, &work_dir, BuildGate::Enforce, state, events)
            .await?;

        match flow {
            StageFlow::Completed => {
                Ok(self.complete(&wf, &work_dir, std::mem::take(state), events).await)
            }
            StageFlow::Cancelled => {
                self.finalize_status(wf.id, WorkflowStatus::Failed, events).await;
                let mut state = std::mem::take(state);
                state.summaries.push("cancelled by operator".to_string());
                Ok(state.into_result(false))
            }
            StageFlow::FixScheduled => {
                let mut state = std::mem::take(state);
                state
                    .summaries
                    .push("build verification failed; fix pipeline scheduled".to_string());
                Ok(state.into_result(false))
            }
        }
    }

    /// Run `stages` in order against `work_dir`, consulting the interrupt
    /// controller before each and enforcing the build gate after a
    /// successful code stage when `gate` says so.
    pub(crate) async fn run_stages(
        &self,
        wf: &Workflow,
        stages: &[StageKind],
        envs: &[StageEnv],
        work_dir: &Path,
        gate: BuildGate,
        state: &mut LoopState,
        events: &EventLogger,
    ) -> Result<StageFlow, PipelineError> {
        for (stage, env) in stages.iter().zip(envs.iter()) {
            let stage = *stage;

            let instructions = match self.interrupts.check_boundary(wf.id, stage).await {
                BoundaryDecision::Cancelled => return Ok(StageFlow::Cancelled),
                BoundaryDecision::Proceed { instructions } => instructions,
            };

            let input = StageInput {
                workflow_id: wf.id,
                stage,
                workflow_type: wf.workflow_type.clone(),
                module_name: wf.module_name.clone(),
                task_description: wf.task_description.clone(),
                working_dir: work_dir.display().to_string(),
                branch_name: wf.branch_name.clone(),
                model: env.model.clone(),
                instructions,
                prior_artifacts: state.artifacts.clone(),
            };
            let input_json =
                serde_json::to_string(&input).context("Failed to serialize stage input")?;

            // record exists before the capability runs
            let execution = {
                let wf_id = wf.id;
                self.db
                    .call(move |db| db.create_agent_execution(wf_id, stage, &input_json))
                    .await
                    .map_err(PipelineError::Database)?
            };
            events
                .info(wf.id, "stage_started", &format!("{} stage started", stage))
                .await;

            let invocation = self.registry.agent(stage).invoke(&input).await;

            match invocation {
                Ok(outcome) => {
                    let output_json = serde_json::to_string(&outcome)
                        .context("Failed to serialize stage outcome")?;
                    let status = if outcome.success {
                        ExecutionStatus::Completed
                    } else {
                        ExecutionStatus::Failed
                    };
                    let error = (!outcome.success).then(|| outcome.summary.clone());
                    {
                        let execution_id = execution.id;
                        self.db
                            .call(move |db| {
                                db.finalize_agent_execution(
                                    execution_id,
                                    status,
                                    Some(&output_json),
                                    error.as_deref(),
                                )
                            })
                            .await
                            .map_err(PipelineError::Database)?;
                    }

                    let stage_succeeded = outcome.success;
                    if stage_succeeded {
                        events
                            .info(wf.id, "stage_completed", &format!("{} stage completed", stage))
                            .await;
                    } else {
                        state.stage_failed = true;
                        events
                            .warning(
                                wf.id,
                                "stage_failed",
                                &format!("{} stage reported failure: {}", stage, outcome.summary),
                            )
                            .await;
                    }
                    if !outcome.summary.is_empty() {
                        state.summaries.push(format!("{}: {}", stage, outcome.summary));
                    }
                    state.artifacts.extend(outcome.artifacts);

                    if stage == StageKind::Code
                        && stage_succeeded
                        && gate == BuildGate::Enforce
                    {
                        let verdict = self.verifier.verify(work_dir).await;
                        if verdict.success {
                            self.checkpoint(wf, work_dir, state, events).await;
                        } else {
                            let phase = verdict.phase.map(|p| p.as_str()).unwrap_or("build");
                            let diagnostic = verdict
                                .diagnostic
                                .unwrap_or_else(|| "build verification failed".to_string());
                            events
                                .error(
                                    wf.id,
                                    "build_failed",
                                    &format!("{} failed:\n{}", phase, diagnostic),
                                )
                                .await;
                            healing::schedule_fix(
                                self.clone(),
                                wf.clone(),
                                work_dir.to_path_buf(),
                                diagnostic,
                                state.clone(),
                                events.clone(),
                            )
                            .await?;
                            return Ok(StageFlow::FixScheduled);
                        }
                    }
                }
                Err(e) => {
                    state.stage_failed = true;
                    let message = e.to_string();
                    {
                        let execution_id = execution.id;
                        let message = message.clone();
                        self.db
                            .call(move |db| {
                                db.finalize_agent_execution(
                                    execution_id,
                                    ExecutionStatus::Failed,
                                    None,
                                    Some(&message),
                                )
                            })
                            .await
                            .map_err(PipelineError::Database)?;
                    }
                    events
                        .warning(
                            wf.id,
                            "stage_failed",
                            &format!("{} stage threw: {}", stage, message),
                        )
                        .await;
                    state.summaries.push(format!("{}: {}", stage, message));
                }
            }
        }
        Ok(StageFlow::Completed)
    }

    /// Completion tail shared by a full run and a fix-resume: decompose a
    /// plan artifact into child workflows, push a clean root pipeline, and
    /// finalize the workflow status.
    pub(crate) async fn complete(
        &self,
        wf: &Workflow,
        work_dir: &Path,
        state: LoopState,
        events: &EventLogger,
    ) -> PipelineResult {
        self.decomposer.maybe_expand(wf, &state.artifacts, events).await;

        if wf.is_root() && !state.stage_failed {
            self.push_root(wf, work_dir, events).await;
        }

        let final_status = if state.stage_failed {
            WorkflowStatus::CompletedWithWarnings
        } else {
            WorkflowStatus::Completed
        };
        self.finalize_status(wf.id, final_status, events).await;
        events
            .info(
                wf.id,
                "pipeline_completed",
                &format!("finished {}", final_status),
            )
            .await;

        let success = !state.stage_failed;
        state.into_result(success)
    }

    /// Commit a dirty tree after a verified build and persist the commit
    /// as the workflow's checkpoint. Failures land in the summary, never
    /// in the result status.
    pub(crate) async fn checkpoint(
        &self,
        wf: &Workflow,
        work_dir: &Path,
        state: &mut LoopState,
        events: &EventLogger,
    ) {
        let git = GitWorkspace::new(work_dir);
        match git.is_dirty().await {
            Ok(false) => {
                events
                    .info(wf.id, "checkpoint_skipped", "working tree clean")
                    .await;
            }
            Ok(true) => {
                let message = vcs::checkpoint_message(wf.id, &wf.task_description);
                match git.commit_all(&message).await {
                    Ok(sha) => {
                        let wf_id = wf.id;
                        let commit = sha.clone();
                        if let Err(e) = self
                            .db
                            .call(move |db| db.set_checkpoint(wf_id, &commit))
                            .await
                        {
                            tracing::warn!(wf_id, "failed to persist checkpoint: {:#}", e);
                        }
                        events
                            .info(wf.id, "checkpoint_created", &format!("committed {}", sha))
                            .await;
                    }
                    Err(e) => {
                        state.summaries.push(format!("checkpoint commit failed: {}", e));
                        events
                            .warning(wf.id, "checkpoint_failed", &e.to_string())
                            .await;
                    }
                }
            }
            Err(e) => {
                state.summaries.push(format!("checkpoint skipped: {}", e));
                events
                    .warning(wf.id, "checkpoint_failed", &e.to_string())
                    .await;
            }
        }
    }

    /// Push the branch when local HEAD moved past the remote tracking ref.
    /// Warnings only; a failed push never fails the pipeline.
    async fn push_root(&self, wf: &Workflow, work_dir: &Path, events: &EventLogger) {
        if wf.branch_name.is_empty() {
            tracing::debug!(wf_id = wf.id, "no branch configured, skipping push");
            return;
        }
        let git = GitWorkspace::new(work_dir);
        let ahead = match (git.head_sha().await, git.remote_ref(&wf.branch_name).await) {
            (Ok(Some(local)), Ok(remote)) => remote.as_deref() != Some(local.as_str()),
            (Ok(None), _) => false,
            (Err(e), _) | (_, Err(e)) => {
                events
                    .warning(wf.id, "push_skipped", &format!("could not compare refs: {}", e))
                    .await;
                return;
            }
        };
        if !ahead {
            events
                .info(wf.id, "push_skipped", "local and remote refs match")
                .await;
            return;
        }
        match git.push(&wf.branch_name).await {
            Ok(()) => {
                events.info(wf.id, "branch_pushed", &wf.branch_name).await;
            }
            Err(e) => {
                events.warning(wf.id, "push_failed", &e.to_string()).await;
            }
        }
    }

    pub(crate) async fn finalize_status(
        &self,
        workflow_id: i64,
        status: WorkflowStatus,
        events: &EventLogger,
    ) {
        let result = self
            .db
            .call(move |db| db.update_workflow_status(workflow_id, &status))
            .await;
        if let Err(e) = result {
            events
                .error(
                    workflow_id,
                    "status_update_failed",
                    &format!("could not mark {}: {:#}", status, e),
                )
                .await;
        }
    }

    pub(crate) async fn load_workflow(&self, id: i64) -> Result<Workflow, PipelineError> {
        self.db
            .call(move |db| db.get_workflow(id))
            .await
            .map_err(PipelineError::Database)?
            .ok_or(PipelineError::WorkflowNotFound { id })
    }
}
