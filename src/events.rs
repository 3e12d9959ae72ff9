//! Structured run history persisted to the execution log table.
//!
//! Log writes never fail the pipeline: persistence errors are reported
//! to the tracing subscriber and dropped.

use uuid::Uuid;

use crate::db::DbHandle;
use crate::models::LogLevel;

#[derive(Clone)]
pub struct EventLogger {
    db: DbHandle,
    run_id: Option<Uuid>,
}

impl EventLogger {
    pub fn new(db: DbHandle) -> Self {
        Self { db, run_id: None }
    }

    /// Tag a copy of this logger with a run correlation id. Every entry it
    /// writes carries the id in its structured data.
    pub fn for_run(&self, run_id: Uuid) -> Self {
        Self {
            db: self.db.clone(),
            run_id: Some(run_id),
        }
    }

    pub async fn log(
        &self,
        workflow_id: Option<i64>,
        level: LogLevel,
        event_type: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) {
        match level {
            LogLevel::Error => tracing::error!(workflow_id, event_type, "{}", message),
            LogLevel::Warning => tracing::warn!(workflow_id, event_type, "{}", message),
            LogLevel::Info => tracing::info!(workflow_id, event_type, "{}", message),
            LogLevel::Debug => tracing::debug!(workflow_id, event_type, "{}", message),
        }

        let data = match (self.run_id, data) {
            (Some(run_id), Some(mut value)) => {
                if let Some(object) = value.as_object_mut() {
                    object.insert(
                        "run_id".to_string(),
                        serde_json::Value::String(run_id.to_string()),
                    );
                }
                Some(value)
            }
            (Some(run_id), None) => Some(serde_json::json!({ "run_id": run_id.to_string() })),
            (None, data) => data,
        };

        let event_type = event_type.to_string();
        let message = message.to_string();
        let data_json = data.map(|d| d.to_string());
        let written = self
            .db
            .call(move |db| {
                db.append_log(workflow_id, level, &event_type, &message, data_json.as_deref())
            })
            .await;
        if let Err(e) = written {
            tracing::warn!("Failed to persist log event: {:#}", e);
        }
    }

    pub async fn info(&self, workflow_id: i64, event_type: &str, message: &str) {
        self.log(Some(workflow_id), LogLevel::Info, event_type, message, None)
            .await;
    }

    pub async fn warning(&self, workflow_id: i64, event_type: &str, message: &str) {
        self.log(Some(workflow_id), LogLevel::Warning, event_type, message, None)
            .await;
    }

    pub async fn error(&self, workflow_id: i64, event_type: &str, message: &str) {
        self.log(Some(workflow_id), LogLevel::Error, event_type, message, None)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MendDb;
    use crate::models::{NewWorkflow, WorkflowStatus};

    #[tokio::test]
    async fn test_events_land_in_execution_log() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let wf = db
            .call(|db| {
                db.create_workflow(&NewWorkflow {
                    task_description: "log test".to_string(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();

        let events = EventLogger::new(db.clone());
        events.info(wf.id, "stage_started", "plan").await;
        events
            .log(
                Some(wf.id),
                LogLevel::Error,
                "build_failed",
                "tsc reported errors",
                Some(serde_json::json!({"phase": "typecheck"})),
            )
            .await;

        let logs = db.call(move |db| db.list_logs(Some(wf.id), 10)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].event_type, "stage_started");
        assert_eq!(logs[1].level, LogLevel::Error);
        assert!(logs[1].data_json.as_deref().unwrap_or("").contains("typecheck"));
        // untouched by logging
        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        assert_eq!(reread.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_tag_rides_in_structured_data() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let wf = db
            .call(|db| {
                db.create_workflow(&NewWorkflow {
                    task_description: "tag test".to_string(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();

        let run_id = Uuid::new_v4();
        let events = EventLogger::new(db.clone()).for_run(run_id);
        events.info(wf.id, "pipeline_started", "starting").await;
        events
            .log(
                Some(wf.id),
                LogLevel::Info,
                "stage_started",
                "plan",
                Some(serde_json::json!({"stage": "plan"})),
            )
            .await;

        let logs = db.call(move |db| db.list_logs(Some(wf.id), 10)).await.unwrap();
        assert_eq!(logs.len(), 2);
        for entry in &logs {
            assert!(
                entry
                    .data_json
                    .as_deref()
                    .unwrap_or("")
                    .contains(&run_id.to_string())
            );
        }
        // merged alongside existing fields, not replacing them
        assert!(logs[1].data_json.as_deref().unwrap().contains("\"stage\""));
    }
}
