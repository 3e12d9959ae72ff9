//! Default process-backed stage capability.
//!
//! Spawns the configured agent executable once per stage, streams its
//! stream-json stdout, and folds the final result text into the stage
//! outcome contract. The agent inherits the process environment, so the
//! API credential reaches it without ever touching a persisted snapshot.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::config::Config;
use crate::errors::AgentError;
use crate::models::{Artifact, StageKind, StageOutcome};
use crate::stage::{StageAgent, StageInput};

pub struct ProcessAgent {
    cmd: String,
    flags: Vec<String>,
}

impl ProcessAgent {
    pub fn new(config: &Config) -> Self {
        Self {
            cmd: config.agent_cmd.clone(),
            flags: config.agent_flags(),
        }
    }

    /// Build the stage prompt from the input snapshot.
    fn build_prompt(input: &StageInput) -> String {
        let directive = match input.stage {
            StageKind::Plan => {
                "Produce an implementation plan. If the work should be split into \
                 sub-workflows, include a fenced json block with an object \
                 {\"objective\", \"subTasks\": [{\"id\", \"name\", \"description\", \"type\", \"dependsOn\"}]} \
                 as a structured_plan artifact."
            }
            StageKind::Code => "Implement the change in the working directory.",
            StageKind::Test => "Write and run tests for the change; report failures honestly.",
            StageKind::Review => "Review the change for defects and report findings.",
            StageKind::Document => "Update documentation affected by the change.",
            StageKind::Scaffold => "Create the module skeleton and wiring for the change.",
        };

        let mut prompt = format!(
            "Stage: {}\nModule: {}\nBranch: {}\n\nTask:\n{}\n\n{}",
            input.stage, input.module_name, input.branch_name, input.task_description, directive
        );
        if !input.instructions.is_empty() {
            prompt.push_str("\n\nAdditional operator instructions:\n");
            for (i, instruction) in input.instructions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, instruction));
            }
        }
        prompt.push_str(
            "\n\nWhen finished, print a fenced json block with \
             {\"success\", \"artifacts\", \"summary\"} describing the outcome.",
        );
        prompt
    }

    /// Fold the agent's final text into a stage outcome.
    ///
    /// If the text carries a JSON object that parses as an outcome, use it;
    /// otherwise the text itself becomes a single text artifact with
    /// success assumed. Mirrors how plan responses are recovered from
    /// markdown-wrapped output.
    fn parse_outcome(text: &str) -> StageOutcome {
        if let Some(start) = text.find('{')
            && let Some(end) = text.rfind('}')
            && let Ok(outcome) = serde_json::from_str::<StageOutcome>(&text[start..=end])
        {
            return outcome;
        }
        let summary = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        StageOutcome {
            success: true,
            artifacts: vec![Artifact {
                artifact_type: "text".to_string(),
                content: text.to_string(),
                file_path: None,
                metadata: None,
            }],
            summary: truncate(summary, 200),
            suggestions: None,
            metadata: None,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One parsed line of agent stdout.
fn result_text_from_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Some(trimmed.to_string()).filter(|s| !s.is_empty());
    }
    let parsed = serde_json::from_str::<serde_json::Value>(trimmed).ok()?;
    match parsed.get("type").and_then(|t| t.as_str()) {
        // Final result event of the stream-json format
        Some("result") => parsed
            .get("result")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string()),
        // Progress events carry no result text
        Some(_) => None,
        None => Some(trimmed.to_string()),
    }
}

#[async_trait::async_trait]
impl StageAgent for ProcessAgent {
    async fn invoke(&self, input: &StageInput) -> Result<StageOutcome, AgentError> {
        let prompt = Self::build_prompt(input);

        let mut cmd = Command::new(&self.cmd);
        cmd.args(&self.flags)
            .args(["--model", &input.model, "-p", &prompt])
            .current_dir(&input.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| AgentError::SpawnFailed {
            cmd: self.cmd.clone(),
            source: e,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut result_text = String::new();
        if let Some(stdout) = stdout {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::trace!(stage = %input.stage, "agent: {}", line);
                        if let Some(text) = result_text_from_line(&line) {
                            if !result_text.is_empty() {
                                result_text.push('\n');
                            }
                            result_text.push_str(&text);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(AgentError::StreamRead { source: e }),
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::StreamRead { source: e })?;

        if !status.success() {
            let mut detail = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut detail).await;
            }
            let exit_code = status.code().unwrap_or(-1);
            tracing::debug!(stage = %input.stage, exit_code, "agent failed: {}", detail.trim());
            return Err(AgentError::NonZeroExit { exit_code });
        }

        if result_text.trim().is_empty() {
            return Err(AgentError::Other(anyhow::anyhow!(
                "Agent produced no output for {} stage",
                input.stage
            )
            .context(format!("workflow {}", input.workflow_id))));
        }

        Ok(Self::parse_outcome(&result_text))
    }
}
