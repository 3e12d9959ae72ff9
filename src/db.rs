//! Persistence gateway: SQLite storage for workflows, agent executions,
//! execution logs, and workflow messages.
//!
//! `MendDb` is the synchronous CRUD surface; `DbHandle` wraps it for async
//! callers. The handle is constructed once at startup and passed into the
//! orchestrator explicitly.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::errors::PipelineError;
use crate::models::*;

/// Maximum stored length of an agent execution error message.
const ERROR_MESSAGE_LIMIT: usize = 2000;

/// Async-safe handle to the orchestrator database.
///
/// Wraps `MendDb` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, preventing synchronous SQLite I/O from
/// tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<MendDb>>,
}

impl DbHandle {
    pub fn new(db: MendDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&MendDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Acceptable in dedicated
    /// tasks, startup, and tests; must not be called from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, MendDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct MendDb {
    conn: Connection,
}

impl MendDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    parent_id INTEGER REFERENCES workflows(id),
                    workflow_type TEXT NOT NULL DEFAULT 'feature',
                    status TEXT NOT NULL DEFAULT 'pending',
                    branch_name TEXT NOT NULL DEFAULT '',
                    module_name TEXT NOT NULL DEFAULT '',
                    task_description TEXT NOT NULL DEFAULT '',
                    working_dir TEXT NOT NULL DEFAULT '',
                    execution_order INTEGER NOT NULL DEFAULT 0,
                    is_paused INTEGER NOT NULL DEFAULT 0,
                    pause_reason TEXT,
                    pause_requested_at TEXT,
                    checkpoint_commit TEXT,
                    checkpoint_at TEXT,
                    auto_expand INTEGER NOT NULL DEFAULT 1,
                    plan_json TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    started_at TEXT,
                    completed_at TEXT,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS agent_executions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                    agent_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'running',
                    input_json TEXT NOT NULL DEFAULT '{}',
                    output_json TEXT,
                    error_message TEXT,
                    started_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS execution_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id INTEGER,
                    level TEXT NOT NULL DEFAULT 'info',
                    event_type TEXT NOT NULL,
                    message TEXT NOT NULL DEFAULT '',
                    data_json TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workflow_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                    agent_execution_id INTEGER REFERENCES agent_executions(id),
                    message_type TEXT NOT NULL DEFAULT 'user',
                    agent_type TEXT,
                    content TEXT NOT NULL DEFAULT '',
                    action_type TEXT NOT NULL DEFAULT 'comment',
                    action_status TEXT NOT NULL DEFAULT 'pending',
                    metadata_json TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_workflows_parent ON workflows(parent_id);
                CREATE INDEX IF NOT EXISTS idx_executions_workflow ON agent_executions(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_logs_workflow ON execution_logs(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_messages_workflow ON workflow_messages(workflow_id, action_status);

                CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_sibling_order
                    ON workflows(parent_id, execution_order)
                    WHERE parent_id IS NOT NULL;
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations (columns are nullable, safe to re-run).
        // Only "duplicate column" errors are ignored; anything else propagates.
        match self
            .conn
            .execute("ALTER TABLE workflows ADD COLUMN plan_json TEXT", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add plan_json column: {}", e)),
        }
        match self
            .conn
            .execute("ALTER TABLE workflows ADD COLUMN pause_requested_at TEXT", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to add pause_requested_at column: {}",
                    e
                ));
            }
        }

        Ok(())
    }

    // ── Workflow CRUD ─────────────────────────────────────────────────

    pub fn create_workflow(&self, new: &NewWorkflow) -> Result<Workflow> {
        self.conn
            .execute(
                "INSERT INTO workflows (parent_id, workflow_type, branch_name, module_name,
                    task_description, working_dir, execution_order, auto_expand)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.parent_id,
                    new.workflow_type,
                    new.branch_name,
                    new.module_name,
                    new.task_description,
                    new.working_dir,
                    new.execution_order,
                    new.auto_expand as i64,
                ],
            )
            .context("Failed to insert workflow")?;
        let id = self.conn.last_insert_rowid();
        self.get_workflow(id)?
            .context("Workflow not found after insert")
    }

    pub fn get_workflow(&self, id: i64) -> Result<Option<Workflow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflows WHERE id = ?1",
                WORKFLOW_COLUMNS
            ))
            .context("Failed to prepare get_workflow")?;
        let mut rows = stmt
            .query_map(params![id], workflow_from_row)
            .context("Failed to query workflow")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read workflow row")?.try_into()?)),
            None => Ok(None),
        }
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflows ORDER BY id",
                WORKFLOW_COLUMNS
            ))
            .context("Failed to prepare list_workflows")?;
        let rows = stmt
            .query_map([], workflow_from_row)
            .context("Failed to query workflows")?;
        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row.context("Failed to read workflow row")?.try_into()?);
        }
        Ok(workflows)
    }

    pub fn list_children(&self, parent_id: i64) -> Result<Vec<Workflow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflows WHERE parent_id = ?1 ORDER BY execution_order",
                WORKFLOW_COLUMNS
            ))
            .context("Failed to prepare list_children")?;
        let rows = stmt
            .query_map(params![parent_id], workflow_from_row)
            .context("Failed to query children")?;
        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row.context("Failed to read workflow row")?.try_into()?);
        }
        Ok(workflows)
    }

    /// Status write guarded by the transition table. Running sets started_at
    /// if unset; terminal statuses set completed_at.
    pub fn update_workflow_status(&self, id: i64, to: &WorkflowStatus) -> Result<Workflow> {
        let current = self
            .get_workflow(id)?
            .ok_or_else(|| anyhow::Error::new(PipelineError::WorkflowNotFound { id }))?;
        if !current.status.can_transition(to) {
            return Err(anyhow::Error::new(PipelineError::InvalidTransition {
                id,
                from: current.status.as_str().to_string(),
                to: to.as_str().to_string(),
            }));
        }
        match to {
            WorkflowStatus::Running => self
                .conn
                .execute(
                    "UPDATE workflows SET status = ?1,
                        started_at = COALESCE(started_at, datetime('now')),
                        updated_at = datetime('now')
                     WHERE id = ?2",
                    params![to.as_str(), id],
                )
                .context("Failed to update workflow status")?,
            s if s.is_terminal() => self
                .conn
                .execute(
                    "UPDATE workflows SET status = ?1,
                        completed_at = datetime('now'),
                        updated_at = datetime('now')
                     WHERE id = ?2",
                    params![to.as_str(), id],
                )
                .context("Failed to update workflow status")?,
            _ => self
                .conn
                .execute(
                    "UPDATE workflows SET status = ?1, updated_at = datetime('now')
                     WHERE id = ?2",
                    params![to.as_str(), id],
                )
                .context("Failed to update workflow status")?,
        };
        self.get_workflow(id)?
            .context("Workflow not found after status update")
    }

    pub fn set_paused(&self, id: i64, reason: &str) -> Result<Workflow> {
        self.conn
            .execute(
                "UPDATE workflows SET is_paused = 1, pause_reason = ?1,
                    pause_requested_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?2",
                params![reason, id],
            )
            .context("Failed to set paused flag")?;
        self.get_workflow(id)?
            .context("Workflow not found after pause")
    }

    pub fn clear_paused(&self, id: i64) -> Result<Workflow> {
        self.conn
            .execute(
                "UPDATE workflows SET is_paused = 0, pause_reason = NULL,
                    pause_requested_at = NULL, updated_at = datetime('now')
                 WHERE id = ?1",
                params![id],
            )
            .context("Failed to clear paused flag")?;
        self.get_workflow(id)?
            .context("Workflow not found after unpause")
    }

    pub fn set_checkpoint(&self, id: i64, commit: &str) -> Result<Workflow> {
        self.conn
            .execute(
                "UPDATE workflows SET checkpoint_commit = ?1,
                    checkpoint_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?2",
                params![commit, id],
            )
            .context("Failed to set checkpoint")?;
        self.get_workflow(id)?
            .context("Workflow not found after checkpoint update")
    }

    pub fn set_plan(&self, id: i64, plan_json: &str) -> Result<Workflow> {
        self.conn
            .execute(
                "UPDATE workflows SET plan_json = ?1, updated_at = datetime('now')
                 WHERE id = ?2",
                params![plan_json, id],
            )
            .context("Failed to persist plan")?;
        self.get_workflow(id)?
            .context("Workflow not found after plan update")
    }

    // ── Agent execution CRUD ──────────────────────────────────────────

    pub fn create_agent_execution(
        &self,
        workflow_id: i64,
        agent_type: StageKind,
        input_json: &str,
    ) -> Result<AgentExecution> {
        self.conn
            .execute(
                "INSERT INTO agent_executions (workflow_id, agent_type, input_json)
                 VALUES (?1, ?2, ?3)",
                params![workflow_id, agent_type.as_str(), input_json],
            )
            .context("Failed to insert agent execution")?;
        let id = self.conn.last_insert_rowid();
        self.get_agent_execution(id)?
            .context("Agent execution not found after insert")
    }

    /// Single finalization write: status, optional output snapshot, optional
    /// size-bounded error message, completion timestamp.
    pub fn finalize_agent_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        output_json: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<AgentExecution> {
        let bounded = error_message.map(truncate_error);
        self.conn
            .execute(
                "UPDATE agent_executions SET status = ?1, output_json = ?2,
                    error_message = ?3, completed_at = datetime('now')
                 WHERE id = ?4",
                params![status.as_str(), output_json, bounded, id],
            )
            .context("Failed to finalize agent execution")?;
        self.get_agent_execution(id)?
            .context("Agent execution not found after finalize")
    }

    pub fn get_agent_execution(&self, id: i64) -> Result<Option<AgentExecution>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, workflow_id, agent_type, status, input_json, output_json,
                        error_message, started_at, completed_at
                 FROM agent_executions WHERE id = ?1",
            )
            .context("Failed to prepare get_agent_execution")?;
        let mut rows = stmt
            .query_map(params![id], execution_from_row)
            .context("Failed to query agent execution")?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.context("Failed to read agent execution row")?.try_into()?,
            )),
            None => Ok(None),
        }
    }

    pub fn list_agent_executions(&self, workflow_id: i64) -> Result<Vec<AgentExecution>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, workflow_id, agent_type, status, input_json, output_json,
                        error_message, started_at, completed_at
                 FROM agent_executions WHERE workflow_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_agent_executions")?;
        let rows = stmt
            .query_map(params![workflow_id], execution_from_row)
            .context("Failed to query agent executions")?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row.context("Failed to read agent execution row")?.try_into()?);
        }
        Ok(executions)
    }

    // ── Execution log ─────────────────────────────────────────────────

    pub fn append_log(
        &self,
        workflow_id: Option<i64>,
        level: LogLevel,
        event_type: &str,
        message: &str,
        data_json: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO execution_logs (workflow_id, level, event_type, message, data_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![workflow_id, level.as_str(), event_type, message, data_json],
            )
            .context("Failed to append execution log")?;
        Ok(())
    }

    pub fn list_logs(&self, workflow_id: Option<i64>, limit: usize) -> Result<Vec<ExecutionLogEntry>> {
        let (sql, bind_workflow) = match workflow_id {
            Some(_) => (
                "SELECT id, workflow_id, level, event_type, message, data_json, created_at
                 FROM execution_logs WHERE workflow_id = ?1 ORDER BY id DESC LIMIT ?2",
                true,
            ),
            None => (
                "SELECT id, workflow_id, level, event_type, message, data_json, created_at
                 FROM execution_logs ORDER BY id DESC LIMIT ?1",
                false,
            ),
        };
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare list_logs")?;
        let mut entries = Vec::new();
        if bind_workflow {
            let rows = stmt
                .query_map(params![workflow_id, limit as i64], log_from_row)
                .context("Failed to query execution logs")?;
            for row in rows {
                entries.push(row.context("Failed to read log row")?.try_into()?);
            }
        } else {
            let rows = stmt
                .query_map(params![limit as i64], log_from_row)
                .context("Failed to query execution logs")?;
            for row in rows {
                entries.push(row.context("Failed to read log row")?.try_into()?);
            }
        }
        entries.reverse();
        Ok(entries)
    }

    // ── Workflow messages ─────────────────────────────────────────────

    pub fn create_message(&self, new: &NewMessage) -> Result<WorkflowMessage> {
        self.conn
            .execute(
                "INSERT INTO workflow_messages (workflow_id, agent_execution_id, message_type,
                    agent_type, content, action_type, action_status, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.workflow_id,
                    new.agent_execution_id,
                    new.message_type.as_str(),
                    new.agent_type,
                    new.content,
                    new.action_type.as_str(),
                    new.action_status.as_str(),
                    new.metadata_json,
                ],
            )
            .context("Failed to insert workflow message")?;
        let id = self.conn.last_insert_rowid();
        self.get_message(id)?
            .context("Message not found after insert")
    }

    pub fn get_message(&self, id: i64) -> Result<Option<WorkflowMessage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflow_messages WHERE id = ?1",
                MESSAGE_COLUMNS
            ))
            .context("Failed to prepare get_message")?;
        let mut rows = stmt
            .query_map(params![id], message_from_row)
            .context("Failed to query message")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read message row")?.try_into()?)),
            None => Ok(None),
        }
    }

    /// The oldest pending message with an actionable action type. Redirect is
    /// reserved and never selected, so it stays pending.
    pub fn oldest_pending_actionable(&self, workflow_id: i64) -> Result<Option<WorkflowMessage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflow_messages
                 WHERE workflow_id = ?1 AND action_status = 'pending'
                   AND action_type IN ('pause', 'cancel', 'instruction')
                 ORDER BY id ASC LIMIT 1",
                MESSAGE_COLUMNS
            ))
            .context("Failed to prepare oldest_pending_actionable")?;
        let mut rows = stmt
            .query_map(params![workflow_id], message_from_row)
            .context("Failed to query pending messages")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read message row")?.try_into()?)),
            None => Ok(None),
        }
    }

    pub fn update_message_status(&self, id: i64, status: ActionStatus) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE workflow_messages SET action_status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update message status")?;
        if updated == 0 {
            anyhow::bail!("Message {} not found", id);
        }
        Ok(())
    }

    pub fn list_messages(&self, workflow_id: i64) -> Result<Vec<WorkflowMessage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM workflow_messages WHERE workflow_id = ?1 ORDER BY id",
                MESSAGE_COLUMNS
            ))
            .context("Failed to prepare list_messages")?;
        let rows = stmt
            .query_map(params![workflow_id], message_from_row)
            .context("Failed to query messages")?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.context("Failed to read message row")?.try_into()?);
        }
        Ok(messages)
    }
}

fn truncate_error(s: &str) -> String {
    s.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

// ── Row decoding ──────────────────────────────────────────────────────

const WORKFLOW_COLUMNS: &str = "id, parent_id, workflow_type, status, branch_name, module_name, \
     task_description, working_dir, execution_order, is_paused, pause_reason, \
     pause_requested_at, checkpoint_commit, checkpoint_at, auto_expand, plan_json, \
     created_at, started_at, completed_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, workflow_id, agent_execution_id, message_type, agent_type, \
     content, action_type, action_status, metadata_json, created_at";

struct WorkflowRow {
    id: i64,
    parent_id: Option<i64>,
    workflow_type: String,
    status: String,
    branch_name: String,
    module_name: String,
    task_description: String,
    working_dir: String,
    execution_order: i32,
    is_paused: i64,
    pause_reason: Option<String>,
    pause_requested_at: Option<String>,
    checkpoint_commit: Option<String>,
    checkpoint_at: Option<String>,
    auto_expand: i64,
    plan_json: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

fn workflow_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        workflow_type: row.get(2)?,
        status: row.get(3)?,
        branch_name: row.get(4)?,
        module_name: row.get(5)?,
        task_description: row.get(6)?,
        working_dir: row.get(7)?,
        execution_order: row.get(8)?,
        is_paused: row.get(9)?,
        pause_reason: row.get(10)?,
        pause_requested_at: row.get(11)?,
        checkpoint_commit: row.get(12)?,
        checkpoint_at: row.get(13)?,
        auto_expand: row.get(14)?,
        plan_json: row.get(15)?,
        created_at: row.get(16)?,
        started_at: row.get(17)?,
        completed_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = anyhow::Error;

    fn try_from(r: WorkflowRow) -> Result<Self> {
        Ok(Workflow {
            id: r.id,
            parent_id: r.parent_id,
            workflow_type: r.workflow_type,
            status: WorkflowStatus::from_str(&r.status).map_err(anyhow::Error::msg)?,
            branch_name: r.branch_name,
            module_name: r.module_name,
            task_description: r.task_description,
            working_dir: r.working_dir,
            execution_order: r.execution_order,
            is_paused: r.is_paused != 0,
            pause_reason: r.pause_reason,
            pause_requested_at: r.pause_requested_at,
            checkpoint_commit: r.checkpoint_commit,
            checkpoint_at: r.checkpoint_at,
            auto_expand: r.auto_expand != 0,
            plan_json: r.plan_json,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        })
    }
}

struct ExecutionRow {
    id: i64,
    workflow_id: i64,
    agent_type: String,
    status: String,
    input_json: String,
    output_json: Option<String>,
    error_message: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        agent_type: row.get(2)?,
        status: row.get(3)?,
        input_json: row.get(4)?,
        output_json: row.get(5)?,
        error_message: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

impl TryFrom<ExecutionRow> for AgentExecution {
    type Error = anyhow::Error;

    fn try_from(r: ExecutionRow) -> Result<Self> {
        Ok(AgentExecution {
            id: r.id,
            workflow_id: r.workflow_id,
            agent_type: StageKind::from_str(&r.agent_type).map_err(anyhow::Error::msg)?,
            status: ExecutionStatus::from_str(&r.status).map_err(anyhow::Error::msg)?,
            input_json: r.input_json,
            output_json: r.output_json,
            error_message: r.error_message,
            started_at: r.started_at,
            completed_at: r.completed_at,
        })
    }
}

struct LogRow {
    id: i64,
    workflow_id: Option<i64>,
    level: String,
    event_type: String,
    message: String,
    data_json: Option<String>,
    created_at: String,
}

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        level: row.get(2)?,
        event_type: row.get(3)?,
        message: row.get(4)?,
        data_json: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl TryFrom<LogRow> for ExecutionLogEntry {
    type Error = anyhow::Error;

    fn try_from(r: LogRow) -> Result<Self> {
        Ok(ExecutionLogEntry {
            id: r.id,
            workflow_id: r.workflow_id,
            level: LogLevel::from_str(&r.level).map_err(anyhow::Error::msg)?,
            event_type: r.event_type,
            message: r.message,
            data_json: r.data_json,
            created_at: r.created_at,
        })
    }
}

struct MessageRow {
    id: i64,
    workflow_id: i64,
    agent_execution_id: Option<i64>,
    message_type: String,
    agent_type: Option<String>,
    content: String,
    action_type: String,
    action_status: String,
    metadata_json: Option<String>,
    created_at: String,
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        agent_execution_id: row.get(2)?,
        message_type: row.get(3)?,
        agent_type: row.get(4)?,
        content: row.get(5)?,
        action_type: row.get(6)?,
        action_status: row.get(7)?,
        metadata_json: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl TryFrom<MessageRow> for WorkflowMessage {
    type Error = anyhow::Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(WorkflowMessage {
            id: r.id,
            workflow_id: r.workflow_id,
            agent_execution_id: r.agent_execution_id,
            message_type: MessageType::from_str(&r.message_type).map_err(anyhow::Error::msg)?,
            agent_type: r.agent_type,
            content: r.content,
            action_type: ActionType::from_str(&r.action_type).map_err(anyhow::Error::msg)?,
            action_status: ActionStatus::from_str(&r.action_status).map_err(anyhow::Error::msg)?,
            metadata_json: r.metadata_json,
            created_at: r.created_at,
        })
    }
}
