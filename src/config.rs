use std::path::PathBuf;

use crate::errors::PipelineError;
use crate::models::StageKind;

/// Default model when neither a per-stage nor a global override is set.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Environment variable holding the required API credential.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Runtime configuration for the orchestrator process.
///
/// Everything is environment-driven so externally managed deployments can
/// configure the process without files: `MEND_DB_PATH`, `MEND_AGENT_CMD`,
/// `MEND_API_URL`, `SKIP_PERMISSIONS`, plus the per-stage model selection
/// handled by [`StageEnv`].
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub agent_cmd: String,
    pub api_url: Option<String>,
    pub skip_permissions: bool,
    pub verbose: bool,
}

impl Config {
    pub fn from_env(verbose: bool) -> Self {
        let db_path = std::env::var("MEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".mend/mend.db"));
        let agent_cmd = std::env::var("MEND_AGENT_CMD").unwrap_or_else(|_| "claude".to_string());
        let api_url = std::env::var("MEND_API_URL").ok().filter(|s| !s.is_empty());
        let skip_permissions = std::env::var("SKIP_PERMISSIONS")
            .map(|v| v != "false")
            .unwrap_or(true);
        Self {
            db_path,
            agent_cmd,
            api_url,
            skip_permissions,
            verbose,
        }
    }

    /// Flags passed to the agent command for every stage invocation.
    pub fn agent_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags
    }
}

/// Per-stage model/credential selection.
///
/// `MEND_MODEL_<STAGE>` overrides `MEND_MODEL`, which overrides the built-in
/// default. The API key has no per-stage form and is required: resolution
/// fails before any stage runs when it is absent.
#[derive(Debug, Clone)]
pub struct StageEnv {
    pub stage: StageKind,
    pub model: String,
    pub api_key: String,
}

impl StageEnv {
    pub fn resolve(stage: StageKind) -> Result<Self, PipelineError> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::MissingCredential {
                key: API_KEY_VAR.to_string(),
            })?;
        let model = std::env::var(format!("MEND_MODEL_{}", stage.env_suffix()))
            .or_else(|_| std::env::var("MEND_MODEL"))
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self {
            stage,
            model,
            api_key,
        })
    }

    /// Resolve the environment for every stage of a sequence up front, so a
    /// configuration error aborts before the first stage.
    pub fn resolve_all(stages: &[StageKind]) -> Result<Vec<Self>, PipelineError> {
        stages.iter().map(|s| Self::resolve(*s)).collect()
    }
}

/// Env vars are process-global; every test in the crate that reads or
/// writes them must hold this lock.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env(false);
        assert_eq!(config.agent_cmd, "claude");
        assert!(!config.verbose);
        assert!(config.db_path.ends_with("mend.db") || config.db_path.is_absolute());
    }

    #[test]
    fn test_agent_flags_include_stream_json() {
        let config = Config {
            db_path: PathBuf::from(":memory:"),
            agent_cmd: "claude".to_string(),
            api_url: None,
            skip_permissions: true,
            verbose: false,
        };
        let flags = config.agent_flags();
        assert!(flags.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(flags.contains(&"--print".to_string()));
        assert!(flags.contains(&"stream-json".to_string()));
    }

    #[test]
    fn test_stage_env_missing_credential_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let saved = std::env::var(API_KEY_VAR).ok();
        unsafe { std::env::remove_var(API_KEY_VAR) };
        let err = StageEnv::resolve(StageKind::Plan).unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential { .. }));
        assert!(err.to_string().contains(API_KEY_VAR));
        if let Some(v) = saved {
            unsafe { std::env::set_var(API_KEY_VAR, v) };
        }
    }

    #[test]
    fn test_stage_env_per_stage_override_beats_global() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let saved = std::env::var(API_KEY_VAR).ok();
        unsafe {
            std::env::set_var(API_KEY_VAR, "sk-test");
            std::env::set_var("MEND_MODEL", "global-model");
            std::env::set_var("MEND_MODEL_REVIEW", "review-model");
        }

        let review = StageEnv::resolve(StageKind::Review).unwrap();
        assert_eq!(review.model, "review-model");
        let code = StageEnv::resolve(StageKind::Code).unwrap();
        assert_eq!(code.model, "global-model");

        unsafe {
            std::env::remove_var("MEND_MODEL");
            std::env::remove_var("MEND_MODEL_REVIEW");
            match saved {
                Some(v) => std::env::set_var(API_KEY_VAR, v),
                None => std::env::remove_var(API_KEY_VAR),
            }
        }
    }

    #[test]
    fn test_resolve_all_covers_every_stage() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let saved = std::env::var(API_KEY_VAR).ok();
        unsafe { std::env::set_var(API_KEY_VAR, "sk-test") };
        let envs = StageEnv::resolve_all(&[StageKind::Plan, StageKind::Code]).unwrap();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].stage, StageKind::Plan);
        if let Some(v) = saved {
            unsafe { std::env::set_var(API_KEY_VAR, v) };
        } else {
            unsafe { std::env::remove_var(API_KEY_VAR) };
        }
    }
}
