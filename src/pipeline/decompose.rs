//! Plan-driven workflow decomposition.
//!
//! A plan stage may emit a structured-plan artifact describing subtasks.
//! When the workflow opted in to auto-expansion, the plan is persisted on
//! the workflow record and the owning system's API is asked to create one
//! child workflow per subtask. Nothing here can fail the pipeline.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::db::DbHandle;
use crate::events::EventLogger;
use crate::models::{Artifact, StructuredPlan, Workflow};

/// Outbound contract for creating child workflows from a plan.
#[async_trait]
pub trait SubworkflowApi: Send + Sync {
    async fn create_subtasks(
        &self,
        parent_id: i64,
        plan: &StructuredPlan,
    ) -> anyhow::Result<Vec<i64>>;
}

/// HTTP client for the owning system's workflow API.
pub struct HttpWorkflowApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkflowApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct CreatedSubtasks {
    created_ids: Vec<i64>,
}

#[async_trait]
impl SubworkflowApi for HttpWorkflowApi {
    async fn create_subtasks(
        &self,
        parent_id: i64,
        plan: &StructuredPlan,
    ) -> anyhow::Result<Vec<i64>> {
        let url = format!(
            "{}/workflows/{}/subtasks",
            self.base_url.trim_end_matches('/'),
            parent_id
        );
        let response = self
            .client
            .post(&url)
            .json(plan)
            .send()
            .await
            .with_context(|| format!("Failed to reach workflow API at {}", url))?
            .error_for_status()
            .context("Workflow API rejected subtask creation")?;
        let created: CreatedSubtasks = response
            .json()
            .await
            .context("Failed to decode subtask creation response")?;
        Ok(created.created_ids)
    }
}

#[derive(Clone)]
pub struct Decomposer {
    db: DbHandle,
    api: Option<Arc<dyn SubworkflowApi>>,
}

impl Decomposer {
    pub fn new(db: DbHandle, api: Option<Arc<dyn SubworkflowApi>>) -> Self {
        Self { db, api }
    }

    /// Expand a structured-plan artifact into child workflows. Every
    /// failure lands in the log; none reaches the caller.
    pub(crate) async fn maybe_expand(
        &self,
        workflow: &Workflow,
        artifacts: &[Artifact],
        events: &EventLogger,
    ) {
        let Some(plan) = find_plan(artifacts) else {
            return;
        };
        if plan.sub_tasks.is_empty() {
            events
                .info(workflow.id, "decompose_skipped", "structured plan has no subtasks")
                .await;
            return;
        }
        if !workflow.auto_expand {
            events
                .info(
                    workflow.id,
                    "decompose_skipped",
                    "auto-expand disabled for this workflow",
                )
                .await;
            return;
        }

        let plan_json = match serde_json::to_string(&plan) {
            Ok(s) => s,
            Err(e) => {
                events
                    .warning(
                        workflow.id,
                        "decompose_failed",
                        &format!("could not serialize plan: {}", e),
                    )
                    .await;
                return;
            }
        };
        {
            let wf_id = workflow.id;
            if let Err(e) = self.db.call(move |db| db.set_plan(wf_id, &plan_json)).await {
                events
                    .warning(
                        workflow.id,
                        "decompose_failed",
                        &format!("could not persist plan: {:#}", e),
                    )
                    .await;
                return;
            }
        }

        let Some(api) = &self.api else {
            events
                .info(
                    workflow.id,
                    "decompose_skipped",
                    "no workflow API configured, plan persisted only",
                )
                .await;
            return;
        };
        match api.create_subtasks(workflow.id, &plan).await {
            Ok(ids) => {
                events
                    .info(
                        workflow.id,
                        "subtasks_created",
                        &format!("created {} child workflows {:?}", ids.len(), ids),
                    )
                    .await;
            }
            Err(e) => {
                events
                    .warning(workflow.id, "decompose_failed", &format!("{:#}", e))
                    .await;
            }
        }
    }
}

/// Find the first structured-plan artifact and parse its body. Content may
/// wrap the object in prose; the parse window runs from the first brace to
/// the last.
fn find_plan(artifacts: &[Artifact]) -> Option<StructuredPlan> {
    let candidate = artifacts
        .iter()
        .find(|a| a.artifact_type == "structured_plan")?;
    let content = candidate.content.trim();
    let window = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return None,
    };
    match serde_json::from_str(window) {
        Ok(plan) => Some(plan),
        Err(e) => {
            tracing::debug!("structured plan artifact did not parse: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MendDb;
    use crate::models::NewWorkflow;
    use std::sync::Mutex;

    struct MockApi {
        calls: Mutex<Vec<i64>>,
        fail: bool,
    }

    impl MockApi {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl SubworkflowApi for MockApi {
        async fn create_subtasks(
            &self,
            parent_id: i64,
            plan: &StructuredPlan,
        ) -> anyhow::Result<Vec<i64>> {
            self.calls.lock().unwrap().push(parent_id);
            if self.fail {
                anyhow::bail!("workflow API unavailable");
            }
            Ok((1..=plan.sub_tasks.len() as i64).collect())
        }
    }

    fn plan_artifact(content: &str) -> Artifact {
        Artifact {
            artifact_type: "structured_plan".to_string(),
            content: content.to_string(),
            file_path: None,
            metadata: None,
        }
    }

    const PLAN: &str = r#"{
        "objective": "split the work",
        "subTasks": [
            {"name": "auth", "description": "login flow", "type": "feature", "module": "auth"},
            {"name": "storage", "description": "persistence layer"}
        ]
    }"#;

    async fn workflow_with(db: &DbHandle, auto_expand: bool) -> Workflow {
        let new = NewWorkflow {
            workflow_type: "feature".to_string(),
            module_name: "core".to_string(),
            task_description: "build it".to_string(),
            working_dir: "/tmp".to_string(),
            auto_expand,
            ..Default::default()
        };
        db.call(move |db| db.create_workflow(&new)).await.unwrap()
    }

    #[test]
    fn test_find_plan_parses_embedded_object() {
        let artifacts = vec![
            Artifact {
                artifact_type: "text".to_string(),
                content: "notes".to_string(),
                file_path: None,
                metadata: None,
            },
            plan_artifact(&format!("Here is the plan:\n{}\nDone.", PLAN)),
        ];
        let plan = find_plan(&artifacts).unwrap();
        assert_eq!(plan.objective, "split the work");
        assert_eq!(plan.sub_tasks.len(), 2);
        assert_eq!(plan.sub_tasks[0].name, "auth");
        assert_eq!(plan.sub_tasks[1].workflow_type, None);
    }

    #[test]
    fn test_find_plan_rejects_malformed_content() {
        assert!(find_plan(&[plan_artifact("no braces here")]).is_none());
        assert!(find_plan(&[plan_artifact("{not json}")]).is_none());
        assert!(find_plan(&[]).is_none());
    }

    #[tokio::test]
    async fn test_expand_persists_plan_and_calls_api() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let api = Arc::new(MockApi::new(false));
        let decomposer = Decomposer::new(db.clone(), Some(api.clone()));
        let events = EventLogger::new(db.clone());

        let wf = workflow_with(&db, true).await;
        decomposer
            .maybe_expand(&wf, &[plan_artifact(PLAN)], &events)
            .await;

        assert_eq!(*api.calls.lock().unwrap(), vec![wf.id]);
        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        let stored = reread.plan_json.expect("plan persisted");
        assert!(stored.contains("split the work"));
    }

    #[tokio::test]
    async fn test_expand_disabled_skips_persist_and_api() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let api = Arc::new(MockApi::new(false));
        let decomposer = Decomposer::new(db.clone(), Some(api.clone()));
        let events = EventLogger::new(db.clone());

        let wf = workflow_with(&db, false).await;
        decomposer
            .maybe_expand(&wf, &[plan_artifact(PLAN)], &events)
            .await;

        assert!(api.calls.lock().unwrap().is_empty());
        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        assert!(reread.plan_json.is_none());
    }

    #[tokio::test]
    async fn test_expand_skips_empty_subtasks() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let api = Arc::new(MockApi::new(false));
        let decomposer = Decomposer::new(db.clone(), Some(api.clone()));
        let events = EventLogger::new(db.clone());

        let wf = workflow_with(&db, true).await;
        let empty = plan_artifact(r#"{"objective": "nothing", "subTasks": []}"#);
        decomposer.maybe_expand(&wf, &[empty], &events).await;

        assert!(api.calls.lock().unwrap().is_empty());
        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        assert!(reread.plan_json.is_none());
    }

    #[tokio::test]
    async fn test_expand_without_api_persists_only() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let decomposer = Decomposer::new(db.clone(), None);
        let events = EventLogger::new(db.clone());

        let wf = workflow_with(&db, true).await;
        decomposer
            .maybe_expand(&wf, &[plan_artifact(PLAN)], &events)
            .await;

        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        assert!(reread.plan_json.is_some());
    }

    #[tokio::test]
    async fn test_api_failure_is_nonfatal_and_logged() {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let api = Arc::new(MockApi::new(true));
        let decomposer = Decomposer::new(db.clone(), Some(api.clone()));
        let events = EventLogger::new(db.clone());

        let wf = workflow_with(&db, true).await;
        decomposer
            .maybe_expand(&wf, &[plan_artifact(PLAN)], &events)
            .await;

        // the plan landed even though subtask creation did not
        let reread = db.call(move |db| db.get_workflow(wf.id)).await.unwrap().unwrap();
        assert!(reread.plan_json.is_some());

        let logs = db
            .call(move |db| db.list_logs(Some(wf.id), 50))
            .await
            .unwrap();
        assert!(
            logs.iter()
                .any(|l| l.event_type == "decompose_failed"
                    && l.message.contains("workflow API unavailable"))
        );
    }
}
