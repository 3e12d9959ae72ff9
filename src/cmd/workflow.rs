//! Workflow creation, inspection, and signal commands.

use anyhow::{Context, Result};

use mend::db::DbHandle;
use mend::models::{ActionStatus, ActionType, NewMessage, NewWorkflow, Workflow};

pub async fn cmd_create(
    db: &DbHandle,
    task: &str,
    module: &str,
    workflow_type: &str,
    branch: &str,
    dir: &str,
    parent: Option<i64>,
    auto_expand: bool,
) -> Result<()> {
    let new = NewWorkflow {
        parent_id: parent,
        workflow_type: workflow_type.to_string(),
        branch_name: branch.to_string(),
        module_name: module.to_string(),
        task_description: task.to_string(),
        working_dir: dir.to_string(),
        execution_order: 0,
        auto_expand,
    };
    let wf = db.call(move |db| db.create_workflow(&new)).await?;
    let stages: Vec<&str> = wf.sequence().iter().map(|s| s.as_str()).collect();
    println!();
    println!("Created workflow {} ({})", wf.id, wf.workflow_type);
    println!("Stages: {}", stages.join(" -> "));
    println!("Run it with: mend run {}", wf.id);
    println!();
    Ok(())
}

pub async fn cmd_list(db: &DbHandle) -> Result<()> {
    let workflows = db.call(|db| db.list_workflows()).await?;
    if workflows.is_empty() {
        println!();
        println!("No workflows yet. Create one with 'mend create'.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<12} {:<26} {:<14} Task",
        "ID", "Type", "Status", "Module"
    );
    println!(
        "{:<6} {:<12} {:<26} {:<14} ----",
        "------", "------------", "--------------------------", "--------------"
    );
    for wf in &workflows {
        let mut status = wf.status.to_string();
        if wf.is_paused {
            status.push_str(" (paused)");
        }
        println!(
            "{:<6} {:<12} {:<26} {:<14} {}",
            wf.id,
            wf.workflow_type,
            status,
            wf.module_name,
            first_line(&wf.task_description)
        );
    }
    println!();
    println!("{} workflows", workflows.len());
    println!();
    Ok(())
}

pub async fn cmd_status(db: &DbHandle, id: i64) -> Result<()> {
    let wf = fetch(db, id).await?;
    let executions = db.call(move |db| db.list_agent_executions(id)).await?;
    let messages = db.call(move |db| db.list_messages(id)).await?;

    println!();
    println!("Workflow {}", wf.id);
    println!("===========");
    println!();
    println!("Type:       {}", wf.workflow_type);
    println!(
        "Status:     {}{}",
        wf.status,
        if wf.is_paused { " (paused)" } else { "" }
    );
    println!("Module:     {}", wf.module_name);
    if !wf.branch_name.is_empty() {
        println!("Branch:     {}", wf.branch_name);
    }
    println!("Dir:        {}", wf.working_dir);
    if let Some(parent) = wf.parent_id {
        println!("Parent:     {}", parent);
    }
    if let Some(commit) = &wf.checkpoint_commit {
        println!("Checkpoint: {}", commit);
    }
    println!("Created:    {}", wf.created_at);
    if let Some(done) = &wf.completed_at {
        println!("Finished:   {}", done);
    }
    println!();
    println!("Task: {}", first_line(&wf.task_description));

    if !executions.is_empty() {
        println!();
        println!(
            "{:<6} {:<10} {:<10} {:<21} Error",
            "Exec", "Stage", "Status", "Started"
        );
        for e in &executions {
            println!(
                "{:<6} {:<10} {:<10} {:<21} {}",
                e.id,
                e.agent_type.as_str(),
                e.status.as_str(),
                e.started_at,
                e.error_message.as_deref().unwrap_or("-")
            );
        }
    }

    let pending: Vec<_> = messages
        .iter()
        .filter(|m| m.action_status == ActionStatus::Pending)
        .collect();
    if !pending.is_empty() {
        println!();
        println!("Pending signals:");
        for m in pending {
            println!("  [{}] {}: {}", m.id, m.action_type, first_line(&m.content));
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_pause(db: &DbHandle, id: i64, reason: &str) -> Result<()> {
    fetch(db, id).await?;
    let message = NewMessage::user_action(id, ActionType::Pause, reason);
    db.call(move |db| db.create_message(&message)).await?;
    println!(
        "Pause requested for workflow {}; takes effect at the next stage boundary.",
        id
    );
    Ok(())
}

pub async fn cmd_resume(db: &DbHandle, id: i64) -> Result<()> {
    let wf = db.call(move |db| db.clear_paused(id)).await?;
    println!("Workflow {} unpaused (status {}).", wf.id, wf.status);
    Ok(())
}

pub async fn cmd_cancel(db: &DbHandle, id: i64) -> Result<()> {
    fetch(db, id).await?;
    let message = NewMessage::user_action(id, ActionType::Cancel, "operator cancel");
    db.call(move |db| db.create_message(&message)).await?;
    println!(
        "Cancel requested for workflow {}; takes effect at the next stage boundary.",
        id
    );
    Ok(())
}

pub async fn cmd_instruct(db: &DbHandle, id: i64, text: &str) -> Result<()> {
    fetch(db, id).await?;
    let message = NewMessage::user_action(id, ActionType::Instruction, text);
    db.call(move |db| db.create_message(&message)).await?;
    println!("Instruction queued for workflow {}'s next stage.", id);
    Ok(())
}

async fn fetch(db: &DbHandle, id: i64) -> Result<Workflow> {
    db.call(move |db| db.get_workflow(id))
        .await?
        .with_context(|| format!("Workflow {} not found", id))
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > 60 {
        let head: String = line.chars().take(57).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line_truncates_long_tasks() {
        let long = "x".repeat(80);
        let shown = first_line(&long);
        assert_eq!(shown.chars().count(), 60);
        assert!(shown.ends_with("..."));
        assert_eq!(first_line("short\nsecond line"), "short");
    }
}
