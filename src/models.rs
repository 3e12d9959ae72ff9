//! Persisted record types and enum-valued columns.
//!
//! Every enum stored in a TEXT column implements `as_str`/`FromStr`/`Display`
//! and serializes as snake_case, so DB rows, JSON snapshots, and the wire all
//! agree on the same strings.
//!
//! Workflow type is deliberately kept as the raw string the invoking system
//! wrote: unknown types are valid and run the feature stage sequence
//! (`WorkflowType::sequence_for`).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed set of stage kinds a pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Code,
    Test,
    Review,
    Document,
    Scaffold,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Code => "code",
            Self::Test => "test",
            Self::Review => "review",
            Self::Document => "document",
            Self::Scaffold => "scaffold",
        }
    }

    /// Environment variable suffix for per-stage overrides.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Self::Plan => "PLAN",
            Self::Code => "CODE",
            Self::Test => "TEST",
            Self::Review => "REVIEW",
            Self::Document => "DOCUMENT",
            Self::Scaffold => "SCAFFOLD",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "code" => Ok(Self::Code),
            "test" => Ok(Self::Test),
            "review" => Ok(Self::Review),
            "document" => Ok(Self::Document),
            "scaffold" => Ok(Self::Scaffold),
            _ => Err(format!("Invalid stage kind: {}", s)),
        }
    }
}

/// Known workflow types. The `workflows.workflow_type` column stores the raw
/// string; this enum covers the types with dedicated stage sequences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Feature,
    Bugfix,
    Refactor,
    Documentation,
    Review,
    NewModule,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Refactor => "refactor",
            Self::Documentation => "documentation",
            Self::Review => "review",
            Self::NewModule => "new_module",
        }
    }

    /// The ordered stage sequence for this workflow type.
    pub fn sequence(&self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            Self::Feature => &[Plan, Code, Test, Review, Document],
            Self::Bugfix => &[Plan, Code, Test, Review],
            Self::Refactor => &[Plan, Code, Test, Review],
            Self::Documentation => &[Plan, Document],
            Self::Review => &[Review],
            Self::NewModule => &[Scaffold, Plan, Code, Test, Review, Document],
        }
    }

    /// Sequence lookup for a raw type string. Unknown types run the feature
    /// sequence.
    pub fn sequence_for(workflow_type: &str) -> &'static [StageKind] {
        workflow_type
            .parse::<WorkflowType>()
            .unwrap_or(Self::Feature)
            .sequence()
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" => Ok(Self::Feature),
            "bugfix" => Ok(Self::Bugfix),
            "refactor" => Ok(Self::Refactor),
            "documentation" => Ok(Self::Documentation),
            "review" => Ok(Self::Review),
            "new_module" => Ok(Self::NewModule),
            _ => Err(format!("Invalid workflow type: {}", s)),
        }
    }
}

/// Workflow lifecycle status. Pausing is a separate flag on the row, not a
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    PendingFix,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PendingFix => "pending_fix",
            Self::Completed => "completed",
            Self::CompletedWithWarnings => "completed_with_warnings",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed
        )
    }

    /// Whether a status write from `self` to `to` is legal. Same-status
    /// writes are idempotent no-ops and always allowed.
    pub fn can_transition(&self, to: &WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, PendingFix)
                | (Running, Completed)
                | (Running, CompletedWithWarnings)
                | (Running, Failed)
                | (PendingFix, Running)
                | (PendingFix, Completed)
                | (PendingFix, CompletedWithWarnings)
                | (PendingFix, Failed)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "pending_fix" => Ok(Self::PendingFix),
            "completed" => Ok(Self::Completed),
            "completed_with_warnings" => Ok(Self::CompletedWithWarnings),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid workflow status: {}", s)),
        }
    }
}

/// Status of one agent execution (stage attempt).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// Who authored a workflow message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Agent,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid message type: {}", s)),
        }
    }
}

/// Action a workflow message carries. `pause`, `cancel`, and `instruction`
/// are consumed at stage boundaries; `redirect` is reserved and never
/// selected; `comment` and `resume` are informational.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Comment,
    Pause,
    Cancel,
    Redirect,
    Instruction,
    Resume,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Pause => "pause",
            Self::Cancel => "cancel",
            Self::Redirect => "redirect",
            Self::Instruction => "instruction",
            Self::Resume => "resume",
        }
    }

    /// Whether the interrupt controller acts on this action at a boundary.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Pause | Self::Cancel | Self::Instruction)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comment" => Ok(Self::Comment),
            "pause" => Ok(Self::Pause),
            "cancel" => Ok(Self::Cancel),
            "redirect" => Ok(Self::Redirect),
            "instruction" => Ok(Self::Instruction),
            "resume" => Ok(Self::Resume),
            _ => Err(format!("Invalid action type: {}", s)),
        }
    }
}

/// Interrupt-protocol state of a message: pending -> acknowledged ->
/// processed, moved only by the interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Acknowledged,
    Processed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Processed => "processed",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "acknowledged" => Ok(Self::Acknowledged),
            "processed" => Ok(Self::Processed),
            _ => Err(format!("Invalid action status: {}", s)),
        }
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// A persisted pipeline execution. Forms a forest via `parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub branch_name: String,
    pub module_name: String,
    pub task_description: String,
    pub working_dir: String,
    pub execution_order: i32,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub pause_requested_at: Option<String>,
    pub checkpoint_commit: Option<String>,
    pub checkpoint_at: Option<String>,
    pub auto_expand: bool,
    pub plan_json: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl Workflow {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn sequence(&self) -> &'static [StageKind] {
        WorkflowType::sequence_for(&self.workflow_type)
    }
}

/// Insert payload for a new workflow row.
#[derive(Debug, Clone, Default)]
pub struct NewWorkflow {
    pub parent_id: Option<i64>,
    pub workflow_type: String,
    pub branch_name: String,
    pub module_name: String,
    pub task_description: String,
    pub working_dir: String,
    pub execution_order: i32,
    pub auto_expand: bool,
}

/// One record per stage attempt, created before the capability is invoked and
/// finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: i64,
    pub workflow_id: i64,
    pub agent_type: StageKind,
    pub status: ExecutionStatus,
    pub input_json: String,
    pub output_json: Option<String>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Append-only diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub workflow_id: Option<i64>,
    pub level: LogLevel,
    pub event_type: String,
    pub message: String,
    pub data_json: Option<String>,
    pub created_at: String,
}

/// Insert payload for a workflow message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub workflow_id: i64,
    pub agent_execution_id: Option<i64>,
    pub message_type: MessageType,
    pub agent_type: Option<String>,
    pub content: String,
    pub action_type: ActionType,
    pub action_status: ActionStatus,
    pub metadata_json: Option<String>,
}

impl NewMessage {
    /// A user-authored message whose action starts in `pending`.
    pub fn user_action(workflow_id: i64, action_type: ActionType, content: &str) -> Self {
        Self {
            workflow_id,
            agent_execution_id: None,
            message_type: MessageType::User,
            agent_type: None,
            content: content.to_string(),
            action_type,
            action_status: ActionStatus::Pending,
            metadata_json: None,
        }
    }

    /// A system announcement; informational, so it is born `processed`.
    pub fn system(workflow_id: i64, action_type: ActionType, content: &str) -> Self {
        Self {
            workflow_id,
            agent_execution_id: None,
            message_type: MessageType::System,
            agent_type: None,
            content: content.to_string(),
            action_type,
            action_status: ActionStatus::Processed,
            metadata_json: None,
        }
    }

    /// A comment attributed to a stage agent; informational, born `processed`.
    pub fn agent_comment(workflow_id: i64, agent_type: StageKind, content: &str) -> Self {
        Self {
            workflow_id,
            agent_execution_id: None,
            message_type: MessageType::Agent,
            agent_type: Some(agent_type.as_str().to_string()),
            content: content.to_string(),
            action_type: ActionType::Comment,
            action_status: ActionStatus::Processed,
            metadata_json: None,
        }
    }
}

/// A conversational or interrupt entry on a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMessage {
    pub id: i64,
    pub workflow_id: i64,
    pub agent_execution_id: Option<i64>,
    pub message_type: MessageType,
    pub agent_type: Option<String>,
    pub content: String,
    pub action_type: ActionType,
    pub action_status: ActionStatus,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

/// One artifact produced by a stage capability. Field names follow the
/// capability wire contract (`type`, `filePath`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub content: String,
    #[serde(rename = "filePath", default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// What a stage capability returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub success: bool,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate result of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub artifacts: Vec<Artifact>,
    pub summary: String,
}

/// A structured plan artifact: the decomposition contract. Subtask and
/// dependency ids are kept as raw JSON values and passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredPlan {
    pub objective: String,
    #[serde(rename = "subTasks")]
    pub sub_tasks: Vec<SubTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub name: String,
    pub description: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(rename = "dependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_roundtrip() {
        for s in &["plan", "code", "test", "review", "document", "scaffold"] {
            let parsed: StageKind = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_workflow_type_roundtrip() {
        for s in &[
            "feature",
            "bugfix",
            "refactor",
            "documentation",
            "review",
            "new_module",
        ] {
            let parsed: WorkflowType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<WorkflowType>().is_err());
    }

    #[test]
    fn test_workflow_status_roundtrip() {
        for s in &[
            "pending",
            "running",
            "pending_fix",
            "completed",
            "completed_with_warnings",
            "failed",
        ] {
            let parsed: WorkflowStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_action_type_roundtrip() {
        for s in &[
            "comment",
            "pause",
            "cancel",
            "redirect",
            "instruction",
            "resume",
        ] {
            let parsed: ActionType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::PendingFix).unwrap(),
            "\"pending_fix\""
        );
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::CompletedWithWarnings).unwrap(),
            "\"completed_with_warnings\""
        );
        assert_eq!(
            serde_json::to_string(&StageKind::Scaffold).unwrap(),
            "\"scaffold\""
        );
    }

    #[test]
    fn test_bugfix_sequence_is_plan_code_test_review() {
        use StageKind::*;
        assert_eq!(
            WorkflowType::Bugfix.sequence(),
            &[Plan, Code, Test, Review]
        );
    }

    #[test]
    fn test_unknown_workflow_type_falls_back_to_feature_sequence() {
        assert_eq!(
            WorkflowType::sequence_for("experiment"),
            WorkflowType::Feature.sequence()
        );
        assert_eq!(
            WorkflowType::sequence_for("bugfix"),
            WorkflowType::Bugfix.sequence()
        );
    }

    #[test]
    fn test_status_transitions() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition(&Running));
        assert!(Running.can_transition(&PendingFix));
        assert!(PendingFix.can_transition(&Running));
        assert!(PendingFix.can_transition(&Failed));
        assert!(Running.can_transition(&CompletedWithWarnings));
        assert!(!Completed.can_transition(&Running));
        assert!(!Failed.can_transition(&Running));
        assert!(!Pending.can_transition(&Completed));
        // Idempotent writes allowed
        assert!(Running.can_transition(&Running));
    }

    #[test]
    fn test_terminal_statuses() {
        use WorkflowStatus::*;
        assert!(Completed.is_terminal());
        assert!(CompletedWithWarnings.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!PendingFix.is_terminal());
    }

    #[test]
    fn test_actionable_action_types() {
        assert!(ActionType::Pause.is_actionable());
        assert!(ActionType::Cancel.is_actionable());
        assert!(ActionType::Instruction.is_actionable());
        assert!(!ActionType::Redirect.is_actionable());
        assert!(!ActionType::Comment.is_actionable());
        assert!(!ActionType::Resume.is_actionable());
    }

    #[test]
    fn test_artifact_wire_field_names() {
        let artifact = Artifact {
            artifact_type: "structured_plan".to_string(),
            content: "{}".to_string(),
            file_path: Some("docs/plan.md".to_string()),
            metadata: None,
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "structured_plan");
        assert_eq!(json["filePath"], "docs/plan.md");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_structured_plan_parses_wire_shape() {
        let raw = r#"{
            "objective": "Split the auth module",
            "subTasks": [
                {"id": "t1", "name": "Extract session store", "description": "Move session code", "type": "refactor"},
                {"id": "t2", "name": "Add tests", "description": "Cover the store", "dependsOn": ["t1"]}
            ]
        }"#;
        let plan: StructuredPlan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.objective, "Split the auth module");
        assert_eq!(plan.sub_tasks.len(), 2);
        assert_eq!(plan.sub_tasks[0].workflow_type.as_deref(), Some("refactor"));
        assert_eq!(plan.sub_tasks[1].depends_on.len(), 1);
    }

    #[test]
    fn test_stage_outcome_parses_with_defaults() {
        let outcome: StageOutcome = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(outcome.success);
        assert!(outcome.artifacts.is_empty());
        assert_eq!(outcome.summary, "");
        assert!(outcome.suggestions.is_none());
    }
}
