//! Execution log tailing.

use anyhow::Result;
use console::style;

use mend::db::DbHandle;
use mend::models::LogLevel;

pub async fn cmd_logs(db: &DbHandle, workflow: Option<i64>, limit: usize) -> Result<()> {
    let entries = db.call(move |db| db.list_logs(workflow, limit)).await?;
    if entries.is_empty() {
        println!("No log entries.");
        return Ok(());
    }
    for entry in &entries {
        let level = format!("{:<7}", entry.level.as_str());
        let level = match entry.level {
            LogLevel::Error => style(level).red(),
            LogLevel::Warning => style(level).yellow(),
            LogLevel::Debug => style(level).dim(),
            LogLevel::Info => style(level),
        };
        let scope = entry
            .workflow_id
            .map(|id| format!("wf {}", id))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} {:<6} {:<22} {}",
            style(&entry.created_at).dim(),
            level,
            scope,
            entry.event_type,
            entry.message
        );
    }
    Ok(())
}
