//! Build verification for Node-based working trees.
//!
//! Ladder: `npm install`, then `npm run build` if the manifest declares a
//! build script, else `npx tsc --noEmit` if the project uses TypeScript.
//! A tree with no manifest, no build script, and no TypeScript passes
//! vacuously. Failures condense the combined output into a short
//! diagnostic suitable for a fix task description.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

/// Lines kept when condensing failed build output.
static ERROR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\berror\b|\berr!|error TS\d+|✗|✖").unwrap());

const DIAGNOSTIC_LINE_LIMIT: usize = 10;

pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPhase {
    Install,
    Build,
    Typecheck,
}

impl VerifyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Build => "build",
            Self::Typecheck => "typecheck",
        }
    }
}

impl std::fmt::Display for VerifyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub success: bool,
    /// Phase that failed; `None` on success.
    pub phase: Option<VerifyPhase>,
    pub diagnostic: Option<String>,
}

impl VerifyOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            phase: None,
            diagnostic: None,
        }
    }

    pub fn failed(phase: VerifyPhase, diagnostic: String) -> Self {
        Self {
            success: false,
            phase: Some(phase),
            diagnostic: Some(diagnostic),
        }
    }
}

/// Condense build output into at most ten diagnostic lines.
///
/// Pure function of the input text: lines matching the error marker, in
/// order of appearance, capped at ten; if nothing matches, the last ten
/// non-empty lines stand in.
pub fn extract_diagnostic(output: &str) -> String {
    let matching: Vec<&str> = output
        .lines()
        .filter(|l| ERROR_MARKER.is_match(l))
        .take(DIAGNOSTIC_LINE_LIMIT)
        .collect();
    if !matching.is_empty() {
        return matching.join("\n");
    }
    let non_empty: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = non_empty.len().saturating_sub(DIAGNOSTIC_LINE_LIMIT);
    non_empty[start..].join("\n")
}

/// Which command follows a successful install for this manifest.
fn post_install_step(manifest: &serde_json::Value, has_tsconfig: bool) -> Option<VerifyPhase> {
    let has_build = manifest
        .pointer("/scripts/build")
        .is_some_and(|v| v.is_string());
    if has_build {
        return Some(VerifyPhase::Build);
    }
    let uses_typescript = has_tsconfig
        || manifest.pointer("/dependencies/typescript").is_some()
        || manifest.pointer("/devDependencies/typescript").is_some();
    if uses_typescript {
        return Some(VerifyPhase::Typecheck);
    }
    None
}

pub struct BuildVerifier {
    install_timeout: Duration,
    build_timeout: Duration,
}

impl Default for BuildVerifier {
    fn default() -> Self {
        Self {
            install_timeout: INSTALL_TIMEOUT,
            build_timeout: BUILD_TIMEOUT,
        }
    }
}

impl BuildVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(install_timeout: Duration, build_timeout: Duration) -> Self {
        Self {
            install_timeout,
            build_timeout,
        }
    }

    /// Verify the working tree. Never returns an error: anything that
    /// goes wrong is folded into a failed outcome so the caller can route
    /// it to the fix coordinator.
    pub async fn verify(&self, working_dir: &Path) -> VerifyOutcome {
        let manifest_path = working_dir.join("package.json");
        if !manifest_path.exists() {
            tracing::debug!(dir = %working_dir.display(), "no package manifest, nothing to verify");
            return VerifyOutcome::passed();
        }

        let manifest = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap_or_else(|e| {
                tracing::debug!("package.json did not parse: {}", e);
                serde_json::Value::Object(Default::default())
            }),
            Err(e) => {
                tracing::debug!("package.json unreadable: {}", e);
                serde_json::Value::Object(Default::default())
            }
        };

        let install = run_step(
            VerifyPhase::Install,
            "npm",
            &["install"],
            working_dir,
            self.install_timeout,
        )
        .await;
        if !install.success {
            return install;
        }

        let has_tsconfig = working_dir.join("tsconfig.json").exists();
        match post_install_step(&manifest, has_tsconfig) {
            Some(VerifyPhase::Build) => {
                run_step(
                    VerifyPhase::Build,
                    "npm",
                    &["run", "build"],
                    working_dir,
                    self.build_timeout,
                )
                .await
            }
            Some(VerifyPhase::Typecheck) => {
                run_step(
                    VerifyPhase::Typecheck,
                    "npx",
                    &["tsc", "--noEmit"],
                    working_dir,
                    self.build_timeout,
                )
                .await
            }
            _ => VerifyOutcome::passed(),
        }
    }
}

/// Run one verification command and fold its result into an outcome.
async fn run_step(
    phase: VerifyPhase,
    program: &str,
    args: &[&str],
    working_dir: &Path,
    limit: Duration,
) -> VerifyOutcome {
    let child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Timed-out commands must not outlive the verifier
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return VerifyOutcome::failed(phase, format!("failed to start {}: {}", program, e));
        }
    };

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                return VerifyOutcome::passed();
            }
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            VerifyOutcome::failed(phase, extract_diagnostic(&combined))
        }
        Ok(Err(e)) => VerifyOutcome::failed(phase, format!("failed to wait for {}: {}", program, e)),
        Err(_) => VerifyOutcome::failed(
            phase,
            format!("{} timed out after {}s", phase, limit.as_secs()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_no_manifest_passes_vacuously() {
        let dir = tempdir().unwrap();
        let outcome = BuildVerifier::new().verify(dir.path()).await;
        assert!(outcome.success);
        assert!(outcome.phase.is_none());
    }

    #[test]
    fn test_diagnostic_keeps_matching_lines_in_order() {
        let output = "compiling...\nsrc/a.ts(3,1): error TS2304: Cannot find name 'x'\nok line\nsrc/b.ts(9,5): error TS2345: bad argument\n";
        let diag = extract_diagnostic(output);
        assert_eq!(
            diag,
            "src/a.ts(3,1): error TS2304: Cannot find name 'x'\nsrc/b.ts(9,5): error TS2345: bad argument"
        );
    }

    #[test]
    fn test_diagnostic_caps_at_ten_lines() {
        let output = (0..25)
            .map(|i| format!("error number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let diag = extract_diagnostic(&output);
        assert_eq!(diag.lines().count(), 10);
        assert!(diag.starts_with("error number 0"));
        assert!(diag.ends_with("error number 9"));
    }

    #[test]
    fn test_diagnostic_is_deterministic() {
        let output = "npm ERR! code ELIFECYCLE\nnpm ERR! errno 1\nsome noise\n";
        assert_eq!(extract_diagnostic(output), extract_diagnostic(output));
    }

    #[test]
    fn test_diagnostic_falls_back_to_tail() {
        let output = "line one\n\nline two\nline three\n";
        let diag = extract_diagnostic(output);
        assert_eq!(diag, "line one\nline two\nline three");
    }

    #[test]
    fn test_post_install_prefers_build_script() {
        let manifest: serde_json::Value = serde_json::json!({
            "scripts": {"build": "tsc -p ."},
            "devDependencies": {"typescript": "^5"}
        });
        assert_eq!(post_install_step(&manifest, true), Some(VerifyPhase::Build));
    }

    #[test]
    fn test_post_install_typecheck_from_dependency() {
        let manifest: serde_json::Value = serde_json::json!({
            "dependencies": {"typescript": "^5"}
        });
        assert_eq!(
            post_install_step(&manifest, false),
            Some(VerifyPhase::Typecheck)
        );
    }

    #[test]
    fn test_post_install_typecheck_from_tsconfig() {
        let manifest = serde_json::json!({});
        assert_eq!(post_install_step(&manifest, true), Some(VerifyPhase::Typecheck));
    }

    #[test]
    fn test_post_install_nothing_to_run() {
        let manifest = serde_json::json!({"scripts": {"test": "jest"}});
        assert_eq!(post_install_step(&manifest, false), None);
    }

    #[tokio::test]
    async fn test_run_step_captures_failure_diagnostic() {
        let dir = tempdir().unwrap();
        let outcome = run_step(
            VerifyPhase::Build,
            "sh",
            &["-c", "echo 'error: boom'; echo clean; exit 1"],
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.phase, Some(VerifyPhase::Build));
        assert_eq!(outcome.diagnostic.as_deref(), Some("error: boom"));
    }

    #[tokio::test]
    async fn test_run_step_success() {
        let dir = tempdir().unwrap();
        let outcome = run_step(
            VerifyPhase::Install,
            "sh",
            &["-c", "exit 0"],
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_run_step_timeout_is_phase_error() {
        let dir = tempdir().unwrap();
        let outcome = run_step(
            VerifyPhase::Typecheck,
            "sleep",
            &["5"],
            dir.path(),
            Duration::from_millis(100),
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.phase, Some(VerifyPhase::Typecheck));
        assert!(outcome.diagnostic.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_step_missing_program() {
        let dir = tempdir().unwrap();
        let outcome = run_step(
            VerifyPhase::Install,
            "definitely-not-npm-mend",
            &[],
            dir.path(),
            Duration::from_secs(1),
        )
        .await;
        assert!(!outcome.success);
        assert!(outcome.diagnostic.as_deref().unwrap_or("").contains("failed to start"));
    }
}
