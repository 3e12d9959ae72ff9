//! Version control adapter for checkpoint commits and pushes.
//!
//! libgit2 calls run on the blocking pool behind an async facade; the
//! network-touching push shells out to the git binary so it picks up the
//! operator's credential helpers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, Signature, StatusOptions};
use tokio::process::Command;

use crate::errors::PipelineError;

/// Commit message for a checkpoint, synthesized from the workflow and its
/// task. Only the first line of the task feeds the subject.
pub fn checkpoint_message(workflow_id: i64, task_description: &str) -> String {
    let subject: String = task_description
        .lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(72)
        .collect();
    format!("[mend] workflow {}: {}", workflow_id, subject)
}

#[derive(Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Whether the working tree has uncommitted changes, untracked files
    /// included.
    pub async fn is_dirty(&self) -> Result<bool, PipelineError> {
        self.run_blocking(|dir| {
            let repo = open(dir)?;
            let mut opts = StatusOptions::new();
            opts.include_untracked(true);
            let statuses = repo.statuses(Some(&mut opts)).context("Failed to read git status")?;
            Ok(!statuses.is_empty())
        })
        .await
    }

    /// Stage everything and commit, returning the new commit's full hash.
    /// Handles the unborn-branch case by creating an initial commit.
    pub async fn commit_all(&self, message: &str) -> Result<String, PipelineError> {
        let message = message.to_string();
        self.run_blocking(move |dir| {
            let repo = open(dir)?;
            let mut index = repo.index()?;
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            index.write()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = Signature::now("mend", "mend@localhost")?;

            let commit_id = if let Some(parent) = head_commit(&repo) {
                repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?
            } else {
                repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?
            };
            Ok(commit_id.to_string())
        })
        .await
    }

    /// Current HEAD commit hash; `None` on an unborn branch.
    pub async fn head_sha(&self) -> Result<Option<String>, PipelineError> {
        self.run_blocking(|dir| {
            let repo = open(dir)?;
            Ok(head_commit(&repo).map(|c| c.id().to_string()))
        })
        .await
    }

    /// Commit hash of the remote tracking ref for `branch`, if one exists.
    pub async fn remote_ref(&self, branch: &str) -> Result<Option<String>, PipelineError> {
        let name = format!("refs/remotes/origin/{}", branch);
        self.run_blocking(move |dir| {
            let repo = open(dir)?;
            match repo.find_reference(&name) {
                Ok(reference) => Ok(reference.target().map(|oid| oid.to_string())),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Push `branch` to origin through the git binary.
    pub async fn push(&self, branch: &str) -> Result<(), PipelineError> {
        let output = Command::new("git")
            .args(["push", "origin", branch])
            .current_dir(&self.dir)
            .output()
            .await
            .map_err(|e| PipelineError::Git(format!("failed to run git push: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Git(format!(
                "git push failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn run_blocking<R, F>(&self, op: F) -> Result<R, PipelineError>
    where
        F: FnOnce(&Path) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let dir = self.dir.clone();
        match tokio::task::spawn_blocking(move || op(&dir)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PipelineError::Git(format!("{:#}", e))),
            Err(e) => Err(PipelineError::Other(
                anyhow::Error::new(e).context("Git task panicked"),
            )),
        }
    }
}

fn open(dir: &Path) -> Result<Repository> {
    Repository::open(dir).context("Failed to open git repository")
}

fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}
