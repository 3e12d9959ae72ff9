//! Pipeline execution command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use mend::agent::ProcessAgent;
use mend::config::Config;
use mend::db::DbHandle;
use mend::events::EventLogger;
use mend::interrupt::InterruptController;
use mend::models::{PipelineResult, Workflow, WorkflowStatus};
use mend::pipeline::{Decomposer, HttpWorkflowApi, PipelineExecutor, SubworkflowApi};
use mend::stage::AgentRegistry;
use mend::verify::BuildVerifier;

pub async fn cmd_run(db: &DbHandle, config: &Config, id: i64) -> Result<()> {
    let events = EventLogger::new(db.clone());
    let agent = Arc::new(ProcessAgent::new(config));
    let api = config
        .api_url
        .as_deref()
        .map(|url| Arc::new(HttpWorkflowApi::new(url)) as Arc<dyn SubworkflowApi>);

    let executor = PipelineExecutor::new(
        db.clone(),
        AgentRegistry::uniform(agent),
        BuildVerifier::new(),
        InterruptController::new(db.clone(), events.clone()),
        events,
        Decomposer::new(db.clone(), api),
    );

    let result = executor.execute(id).await;

    // a scheduled fix keeps working after execute() returns; wait for the
    // workflow row to settle before reporting
    let wf = wait_for_terminal(db, id).await?;
    report(&wf, &result);

    if wf.status == WorkflowStatus::Failed {
        anyhow::bail!("Workflow {} failed", id);
    }
    Ok(())
}

async fn wait_for_terminal(db: &DbHandle, id: i64) -> Result<Workflow> {
    loop {
        let wf = db
            .call(move |db| db.get_workflow(id))
            .await?
            .with_context(|| format!("Workflow {} not found", id))?;
        if wf.status.is_terminal() {
            return Ok(wf);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn report(wf: &Workflow, result: &PipelineResult) {
    println!();
    println!("Workflow {} finished: {}", wf.id, wf.status);
    if !result.summary.is_empty() {
        println!();
        println!("{}", result.summary);
    }
    if !result.artifacts.is_empty() {
        println!();
        println!("{} artifacts collected", result.artifacts.len());
    }
    if let Some(commit) = &wf.checkpoint_commit {
        println!("Checkpoint: {}", commit);
    }
    println!();
}
