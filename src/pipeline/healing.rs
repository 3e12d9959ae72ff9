//! Bounded self-healing for build failures.
//!
//! When the build gate trips after a code stage, the triggering flow hands
//! off here and returns. A fix workflow (type `bugfix`, child of the broken
//! one) runs plan and code against the same tree, then re-verifies. Up to
//! three attempts; the bound is enforced before each attempt is scheduled,
//! never inside it, so the loop terminates by construction.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::config::StageEnv;
use crate::errors::PipelineError;
use crate::events::EventLogger;
use crate::models::{NewWorkflow, StageKind, Workflow, WorkflowStatus};

use super::executor::{BuildGate, LoopState, PipelineExecutor, StageFlow};

/// Fix attempts per build failure. The third failed re-verification fails
/// both the fix and its parent.
pub const MAX_FIX_ATTEMPTS: i32 = 3;

/// Stages a fix pipeline runs before re-verifying the build.
const FIX_STAGES: [StageKind; 2] = [StageKind::Plan, StageKind::Code];

/// Outcome of one fix attempt.
enum FixVerdict {
    /// Re-verification passed; the carried state holds the fix's artifacts.
    Verified(LoopState),
    StillBroken(String),
    Cancelled,
}

/// Create the first fix workflow, park the parent in `pending_fix`, and
/// spawn the attempt loop. Fire-and-forget relative to the triggering
/// flow: the caller observes `pending_fix` without blocking on the
/// eventual outcome.
pub(crate) async fn schedule_fix(
    executor: PipelineExecutor,
    parent: Workflow,
    work_dir: PathBuf,
    diagnostic: String,
    parent_state: LoopState,
    events: EventLogger,
) -> Result<(), PipelineError> {
    let fix = create_fix_workflow(&executor, &parent, &diagnostic, 1).await?;
    {
        let parent_id = parent.id;
        executor
            .db
            .call(move |db| db.update_workflow_status(parent_id, &WorkflowStatus::PendingFix))
            .await
            .map_err(PipelineError::Database)?;
    }
    events
        .warning(
            parent.id,
            "fix_scheduled",
            &format!("fix workflow {} created (attempt 1 of {})", fix.id, MAX_FIX_ATTEMPTS),
        )
        .await;

    tokio::spawn(async move {
        run_attempts(executor, parent, work_dir, fix, diagnostic, parent_state, events).await;
    });
    Ok(())
}

/// The attempt loop. Each pass runs one fix pipeline to a verdict;
/// verification success resumes the parent, exhaustion fails both sides.
///
/// Boxed return type: this future is recursive through `run_stages` →
/// `schedule_fix`, so its `Send`-ness cannot be inferred; the box erases
/// the cycle.
fn run_attempts(
    executor: PipelineExecutor,
    parent: Workflow,
    work_dir: PathBuf,
    mut fix: Workflow,
    mut diagnostic: String,
    parent_state: LoopState,
    events: EventLogger,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        for attempt in 1..=MAX_FIX_ATTEMPTS {
            match run_one_fix(&executor, &fix, &work_dir, &events).await {
                Ok(FixVerdict::Verified(mut state)) => {
                    executor
                        .finalize_status(fix.id, WorkflowStatus::Completed, &events)
                        .await;
                    executor.checkpoint(&fix, &work_dir, &mut state, &events).await;
                    events
                        .info(fix.id, "fix_verified", "build verification passed")
                        .await;
                    resume_parent(&executor, &parent, &work_dir, parent_state, &events).await;
                    return;
                }
                Ok(FixVerdict::StillBroken(next_diagnostic)) => {
                    if attempt == MAX_FIX_ATTEMPTS {
                        executor
                            .finalize_status(fix.id, WorkflowStatus::Failed, &events)
                            .await;
                        executor
                            .finalize_status(parent.id, WorkflowStatus::Failed, &events)
                            .await;
                        events
                            .error(
                                parent.id,
                                "fix_exhausted",
                                &format!(
                                    "build still broken after {} fix attempts",
                                    MAX_FIX_ATTEMPTS
                                ),
                            )
                            .await;
                        return;
                    }
                    // this attempt did its job even though the build is still
                    // broken; the next attempt is a fresh workflow
                    executor
                        .finalize_status(fix.id, WorkflowStatus::Completed, &events)
                        .await;
                    diagnostic = next_diagnostic;
                    match create_fix_workflow(&executor, &parent, &diagnostic, attempt + 1).await {
                        Ok(next_fix) => {
                            events
                                .warning(
                                    parent.id,
                                    "fix_scheduled",
                                    &format!(
                                        "fix workflow {} created (attempt {} of {})",
                                        next_fix.id,
                                        attempt + 1,
                                        MAX_FIX_ATTEMPTS
                                    ),
                                )
                                .await;
                            fix = next_fix;
                        }
                        Err(e) => {
                            events
                                .error(
                                    parent.id,
                                    "fix_error",
                                    &format!("could not create next fix workflow: {}", e),
                                )
                                .await;
                            executor
                                .finalize_status(parent.id, WorkflowStatus::Failed, &events)
                                .await;
                            return;
                        }
                    }
                }
                Ok(FixVerdict::Cancelled) => {
                    events
                        .warning(fix.id, "fix_cancelled", "fix pipeline cancelled by operator")
                        .await;
                    executor
                        .finalize_status(fix.id, WorkflowStatus::Failed, &events)
                        .await;
                    executor
                        .finalize_status(parent.id, WorkflowStatus::Failed, &events)
                        .await;
                    return;
                }
                Err(e) => {
                    events
                        .error(
                            fix.id,
                            "fix_error",
                            &format!("{:#}", anyhow::Error::new(e)),
                        )
                        .await;
                    executor
                        .finalize_status(fix.id, WorkflowStatus::Failed, &events)
                        .await;
                    executor
                        .finalize_status(parent.id, WorkflowStatus::Failed, &events)
                        .await;
                    return;
                }
            }
        }
    })
}

/// Run one fix pipeline: plan, code, re-verify. The build gate is skipped
/// inside the fix's own stage loop; verification happens here instead.
async fn run_one_fix(
    executor: &PipelineExecutor,
    fix: &Workflow,
    work_dir: &Path,
    events: &EventLogger,
) -> Result<FixVerdict, PipelineError> {
    let envs = StageEnv::resolve_all(&FIX_STAGES)?;
    {
        let id = fix.id;
        executor
            .db
            .call(move |db| db.update_workflow_status(id, &WorkflowStatus::Running))
            .await
            .map_err(PipelineError::Database)?;
    }

    let mut state = LoopState::default();
    let flow = executor
        .run_stages(fix, &FIX_STAGES, &envs, work_dir, BuildGate::Skip, &mut state, events)
        .await?;
    if flow == StageFlow::Cancelled {
        return Ok(FixVerdict::Cancelled);
    }

    let verdict = executor.verifier.verify(work_dir).await;
    if verdict.success {
        Ok(FixVerdict::Verified(state))
    } else {
        Ok(FixVerdict::StillBroken(
            verdict
                .diagnostic
                .unwrap_or_else(|| "build verification failed".to_string()),
        ))
    }
}

/// Run the parent's remaining stages against the fixed tree and finalize
/// it, carrying the state accumulated before the build broke.
async fn resume_parent(
    executor: &PipelineExecutor,
    parent: &Workflow,
    work_dir: &Path,
    mut state: LoopState,
    events: &EventLogger,
) {
    let parent = {
        let id = parent.id;
        match executor
            .db
            .call(move |db| db.update_workflow_status(id, &WorkflowStatus::Running))
            .await
        {
            Ok(wf) => wf,
            Err(e) => {
                events
                    .error(parent.id, "resume_failed", &format!("{:#}", e))
                    .await;
                return;
            }
        }
    };
    events
        .info(parent.id, "pipeline_resumed", "build fixed, resuming remaining stages")
        .await;

    let sequence = parent.sequence();
    let remainder: &[StageKind] = match sequence.iter().position(|s| *s == StageKind::Code) {
        Some(i) => &sequence[i + 1..],
        None => &[],
    };

    let outcome = match StageEnv::resolve_all(remainder) {
        Ok(envs) => {
            executor
                .run_stages(&parent, remainder, &envs, work_dir, BuildGate::Skip, &mut state, events)
                .await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(StageFlow::Completed) => {
            executor.complete(&parent, work_dir, state, events).await;
        }
        Ok(StageFlow::Cancelled) => {
            executor
                .finalize_status(parent.id, WorkflowStatus::Failed, events)
                .await;
        }
        // the skip gate never schedules another fix
        Ok(StageFlow::FixScheduled) => {}
        Err(e) => {
            events
                .error(
                    parent.id,
                    "pipeline_fatal",
                    &format!("{:#}", anyhow::Error::new(e)),
                )
                .await;
            executor
                .finalize_status(parent.id, WorkflowStatus::Failed, events)
                .await;
        }
    }
}

async fn create_fix_workflow(
    executor: &PipelineExecutor,
    parent: &Workflow,
    diagnostic: &str,
    attempt: i32,
) -> Result<Workflow, PipelineError> {
    let new = NewWorkflow {
        parent_id: Some(parent.id),
        workflow_type: "bugfix".to_string(),
        branch_name: parent.branch_name.clone(),
        module_name: parent.module_name.clone(),
        task_description: fix_task_description(diagnostic, attempt),
        working_dir: parent.working_dir.clone(),
        execution_order: attempt,
        auto_expand: false,
    };
    executor
        .db
        .call(move |db| db.create_workflow(&new))
        .await
        .map_err(PipelineError::Database)
}

fn fix_task_description(diagnostic: &str, attempt: i32) -> String {
    format!(
        "Fix the build failure (attempt {} of {}). Verification reported:\n{}",
        attempt, MAX_FIX_ATTEMPTS, diagnostic
    )
}
