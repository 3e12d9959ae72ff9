//! Operator interrupt handling at stage boundaries.
//!
//! Before each stage the controller consumes at most one pending
//! actionable message (pause, cancel, instruction; oldest first) and
//! applies its effect. Redirect messages are reserved and stay pending.
//! Message protocol: pending on receipt, acknowledged once selected,
//! processed when the effect has completed.

use std::time::Duration;

use crate::db::DbHandle;
use crate::events::EventLogger;
use crate::models::{ActionStatus, ActionType, NewMessage, StageKind};

pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const PAUSE_CEILING: Duration = Duration::from_secs(30 * 60);

/// What the boundary check decided for the upcoming stage.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryDecision {
    /// Run the stage. Instruction content, if any, rides along into the
    /// stage input.
    Proceed { instructions: Vec<String> },
    /// Stop the pipeline immediately; no further stage records.
    Cancelled,
}

impl BoundaryDecision {
    fn proceed() -> Self {
        Self::Proceed {
            instructions: Vec::new(),
        }
    }
}

pub struct InterruptController {
    db: DbHandle,
    events: EventLogger,
    poll_interval: Duration,
    pause_ceiling: Duration,
}

impl InterruptController {
    pub fn new(db: DbHandle, events: EventLogger) -> Self {
        Self {
            db,
            events,
            poll_interval: PAUSE_POLL_INTERVAL,
            pause_ceiling: PAUSE_CEILING,
        }
    }

    /// Override the pause timing, for tests that cannot wait minutes.
    pub fn with_timing(
        db: DbHandle,
        events: EventLogger,
        poll_interval: Duration,
        pause_ceiling: Duration,
    ) -> Self {
        Self {
            db,
            events,
            poll_interval,
            pause_ceiling,
        }
    }

    /// Check for an interrupt before `upcoming` runs.
    ///
    /// Interrupt handling is best-effort: a persistence failure here is
    /// logged and the pipeline proceeds, to be retried at the next
    /// boundary.
    pub async fn check_boundary(&self, workflow_id: i64, upcoming: StageKind) -> BoundaryDecision {
        let message = match self
            .db
            .call(move |db| db.oldest_pending_actionable(workflow_id))
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(workflow_id, "interrupt check failed: {:#}", e);
                return BoundaryDecision::proceed();
            }
        };

        let Some(message) = message else {
            // No pending signal; a paused flag left by an earlier boundary
            // still blocks.
            let paused = self
                .db
                .call(move |db| db.get_workflow(workflow_id))
                .await
                .ok()
                .flatten()
                .is_some_and(|wf| wf.is_paused);
            if paused {
                self.wait_while_paused(workflow_id).await;
            }
            return BoundaryDecision::proceed();
        };

        let message_id = message.id;
        self.set_message_status(message_id, ActionStatus::Acknowledged)
            .await;

        match message.action_type {
            ActionType::Pause => {
                let reason = message.content.clone();
                self.post(NewMessage::system(
                    workflow_id,
                    ActionType::Pause,
                    &format!("Pipeline paused before {} stage: {}", upcoming, reason),
                ))
                .await;
                if let Err(e) = self
                    .db
                    .call(move |db| db.set_paused(workflow_id, &reason))
                    .await
                {
                    tracing::warn!(workflow_id, "failed to set paused flag: {:#}", e);
                }
                self.set_message_status(message_id, ActionStatus::Processed)
                    .await;
                self.events
                    .info(workflow_id, "pipeline_paused", &message.content)
                    .await;
                self.wait_while_paused(workflow_id).await;
                BoundaryDecision::proceed()
            }
            ActionType::Cancel => {
                self.post(NewMessage::system(
                    workflow_id,
                    ActionType::Cancel,
                    "Pipeline cancelled by operator request",
                ))
                .await;
                self.set_message_status(message_id, ActionStatus::Processed)
                    .await;
                self.events
                    .warning(workflow_id, "pipeline_cancelled", "cancelled by operator")
                    .await;
                BoundaryDecision::Cancelled
            }
            ActionType::Instruction => {
                self.post(NewMessage::agent_comment(
                    workflow_id,
                    upcoming,
                    &format!("Instruction received: {}", message.content),
                ))
                .await;
                self.set_message_status(message_id, ActionStatus::Processed)
                    .await;
                self.events
                    .info(workflow_id, "instruction_received", &message.content)
                    .await;
                BoundaryDecision::Proceed {
                    instructions: vec![message.content],
                }
            }
            // oldest_pending_actionable never returns these
            ActionType::Redirect | ActionType::Comment | ActionType::Resume => {
                BoundaryDecision::proceed()
            }
        }
    }

    /// Block while the paused flag is set, up to the pause ceiling.
    async fn wait_while_paused(&self, workflow_id: i64) {
        let deadline = tokio::time::Instant::now() + self.pause_ceiling;
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let paused = match self.db.call(move |db| db.get_workflow(workflow_id)).await {
                Ok(Some(wf)) => wf.is_paused,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(workflow_id, "pause poll failed: {:#}", e);
                    true
                }
            };
            if !paused {
                self.post(NewMessage::system(
                    workflow_id,
                    ActionType::Resume,
                    "Pipeline resumed",
                ))
                .await;
                self.events.info(workflow_id, "pipeline_resumed", "pause cleared").await;
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                if let Err(e) = self.db.call(move |db| db.clear_paused(workflow_id)).await {
                    tracing::warn!(workflow_id, "failed to clear expired pause: {:#}", e);
                }
                self.events
                    .warning(
                        workflow_id,
                        "pause_expired",
                        &format!(
                            "pause ceiling of {}s elapsed, resuming automatically",
                            self.pause_ceiling.as_secs()
                        ),
                    )
                    .await;
                return;
            }
        }
    }

    async fn post(&self, message: NewMessage) {
        if let Err(e) = self.db.call(move |db| db.create_message(&message)).await {
            tracing::warn!("failed to post workflow message: {:#}", e);
        }
    }

    async fn set_message_status(&self, message_id: i64, status: ActionStatus) {
        if let Err(e) = self
            .db
            .call(move |db| db.update_message_status(message_id, status))
            .await
        {
            tracing::warn!(message_id, "failed to update message status: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MendDb;
    use crate::models::{MessageType, NewWorkflow};

    async fn setup() -> (DbHandle, i64) {
        let db = DbHandle::new(MendDb::new_in_memory().unwrap());
        let wf = db
            .call(|db| {
                db.create_workflow(&NewWorkflow {
                    workflow_type: "feature".to_string(),
                    task_description: "interrupt test".to_string(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();
        (db, wf.id)
    }

    fn fast_controller(db: &DbHandle) -> InterruptController {
        InterruptController::with_timing(
            db.clone(),
            EventLogger::new(db.clone()),
            Duration::from_millis(10),
            Duration::from_millis(80),
        )
    }

    #[tokio::test]
    async fn test_no_pending_messages_proceeds() {
        let (db, wf_id) = setup().await;
        let controller = fast_controller(&db);
        let decision = controller.check_boundary(wf_id, StageKind::Plan).await;
        assert_eq!(
            decision,
            BoundaryDecision::Proceed {
                instructions: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_terminates_and_posts_system_message() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(wf_id, ActionType::Cancel, "stop"))
        })
        .await
        .unwrap();

        let controller = fast_controller(&db);
        let decision = controller.check_boundary(wf_id, StageKind::Code).await;
        assert_eq!(decision, BoundaryDecision::Cancelled);

        let messages = db.call(move |db| db.list_messages(wf_id)).await.unwrap();
        let system = messages
            .iter()
            .find(|m| m.message_type == MessageType::System)
            .unwrap();
        assert!(system.content.contains("cancelled"));
        // original signal fully processed
        let signal = messages.iter().find(|m| m.content == "stop").unwrap();
        assert_eq!(signal.action_status, ActionStatus::Processed);
    }

    #[tokio::test]
    async fn test_instruction_rides_into_stage_input() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(
                wf_id,
                ActionType::Instruction,
                "use the staging database",
            ))
        })
        .await
        .unwrap();

        let controller = fast_controller(&db);
        let decision = controller.check_boundary(wf_id, StageKind::Test).await;
        assert_eq!(
            decision,
            BoundaryDecision::Proceed {
                instructions: vec!["use the staging database".to_string()]
            }
        );

        let messages = db.call(move |db| db.list_messages(wf_id)).await.unwrap();
        let ack = messages
            .iter()
            .find(|m| m.message_type == MessageType::Agent)
            .unwrap();
        assert_eq!(ack.agent_type.as_deref(), Some("test"));
        assert!(ack.content.contains("use the staging database"));
    }

    #[tokio::test]
    async fn test_pause_blocks_until_ceiling_then_auto_clears() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(
                wf_id,
                ActionType::Pause,
                "waiting on design sign-off",
            ))
        })
        .await
        .unwrap();

        let controller = fast_controller(&db);
        let started = std::time::Instant::now();
        let decision = controller.check_boundary(wf_id, StageKind::Review).await;
        assert!(matches!(decision, BoundaryDecision::Proceed { .. }));
        // blocked at least until the ceiling
        assert!(started.elapsed() >= Duration::from_millis(80));

        let wf = db.call(move |db| db.get_workflow(wf_id)).await.unwrap().unwrap();
        assert!(!wf.is_paused);

        let logs = db.call(move |db| db.list_logs(Some(wf_id), 20)).await.unwrap();
        assert!(logs.iter().any(|l| l.event_type == "pause_expired"));
    }

    #[tokio::test]
    async fn test_pause_cleared_manually_posts_resume() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(wf_id, ActionType::Pause, "hold"))
        })
        .await
        .unwrap();

        let controller = InterruptController::with_timing(
            db.clone(),
            EventLogger::new(db.clone()),
            Duration::from_millis(10),
            Duration::from_secs(30),
        );

        let clearer = {
            let db = db.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                db.call(move |db| db.clear_paused(wf_id)).await.unwrap();
            })
        };

        let decision = controller.check_boundary(wf_id, StageKind::Code).await;
        clearer.await.unwrap();
        assert!(matches!(decision, BoundaryDecision::Proceed { .. }));

        let messages = db.call(move |db| db.list_messages(wf_id)).await.unwrap();
        assert!(messages.iter().any(|m| m.content == "Pipeline resumed"));
        let paused_announcement = messages
            .iter()
            .find(|m| m.content.contains("Pipeline paused"))
            .unwrap();
        assert_eq!(paused_announcement.message_type, MessageType::System);
    }

    #[tokio::test]
    async fn test_redirect_messages_stay_pending() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(
                wf_id,
                ActionType::Redirect,
                "try the other branch",
            ))
        })
        .await
        .unwrap();

        let controller = fast_controller(&db);
        let decision = controller.check_boundary(wf_id, StageKind::Plan).await;
        assert_eq!(
            decision,
            BoundaryDecision::Proceed {
                instructions: vec![]
            }
        );

        let messages = db.call(move |db| db.list_messages(wf_id)).await.unwrap();
        assert_eq!(messages[0].action_status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_oldest_signal_wins() {
        let (db, wf_id) = setup().await;
        db.call(move |db| {
            db.create_message(&NewMessage::user_action(
                wf_id,
                ActionType::Instruction,
                "first",
            ))?;
            db.create_message(&NewMessage::user_action(wf_id, ActionType::Cancel, "second"))
        })
        .await
        .unwrap();

        let controller = fast_controller(&db);
        let decision = controller.check_boundary(wf_id, StageKind::Plan).await;
        // the older instruction is handled; cancel waits for the next boundary
        assert_eq!(
            decision,
            BoundaryDecision::Proceed {
                instructions: vec!["first".to_string()]
            }
        );

        let decision = controller.check_boundary(wf_id, StageKind::Code).await;
        assert_eq!(decision, BoundaryDecision::Cancelled);
    }
}
