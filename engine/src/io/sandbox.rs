//! Ephemeral execution environments shared by all stories of one run.
//!
//! Acquire sandboxes through [`with_sandbox`]: it provisions once, runs the
//! body, and releases exactly once whether the body returns or panics.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::io::git::Git;
use crate::model::RepoRecord;

/// A provisioned environment containing the repository at one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub repo_id: String,
    pub commit_sha: String,
    /// Directory agents run in.
    pub workdir: PathBuf,
    /// Checkout the sandbox was created from.
    pub source: PathBuf,
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn provision(&self, repo: &RepoRecord, commit_sha: &str) -> Result<SandboxHandle>;
    async fn release(&self, handle: SandboxHandle) -> Result<()>;
}

/// Provision a sandbox, run `body` with it, and release it.
///
/// A release failure is logged and does not change the body's result. A panic
/// in the body is resumed after the release.
#[instrument(skip_all, fields(repo_id = %repo.id, commit_sha = %commit_sha))]
pub async fn with_sandbox<T, F, Fut>(
    provider: &dyn SandboxProvider,
    repo: &RepoRecord,
    commit_sha: &str,
    body: F,
) -> Result<T, EngineError>
where
    F: FnOnce(SandboxHandle) -> Fut,
    Fut: Future<Output = T>,
{
    let handle = provider
        .provision(repo, commit_sha)
        .await
        .map_err(EngineError::SandboxProvisioning)?;
    debug!(sandbox_id = %handle.id, workdir = %handle.workdir.display(), "sandbox provisioned");

    let outcome = AssertUnwindSafe(body(handle.clone())).catch_unwind().await;

    let sandbox_id = handle.id.clone();
    if let Err(err) = provider.release(handle).await {
        warn!(sandbox_id = %sandbox_id, err = %format!("{err:#}"), "sandbox release failed");
    } else {
        debug!(sandbox_id = %sandbox_id, "sandbox released");
    }

    match outcome {
        Ok(value) => Ok(value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Detached `git worktree` per run under a scratch directory.
#[derive(Debug, Clone)]
pub struct WorktreeSandbox {
    scratch_dir: PathBuf,
}

impl WorktreeSandbox {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl SandboxProvider for WorktreeSandbox {
    async fn provision(&self, repo: &RepoRecord, commit_sha: &str) -> Result<SandboxHandle> {
        let git = Git::new(&repo.checkout);
        let resolved = git.rev_parse(commit_sha).await?;
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let id = format!("{}-{}", repo.id, Uuid::new_v4());
        let workdir = self.scratch_dir.join(&id);
        git.worktree_add_detached(&workdir, &resolved).await?;
        info!(sandbox_id = %id, commit = %resolved, "worktree sandbox ready");
        Ok(SandboxHandle {
            id,
            repo_id: repo.id.clone(),
            commit_sha: resolved,
            workdir,
            source: repo.checkout.clone(),
        })
    }

    async fn release(&self, handle: SandboxHandle) -> Result<()> {
        let git = Git::new(&handle.source);
        git.worktree_remove(&handle.workdir).await?;
        git.worktree_prune().await
    }
}

/// Evaluate directly in the configured checkout; nothing to clean up.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlaceSandbox;

#[async_trait]
impl SandboxProvider for InPlaceSandbox {
    async fn provision(&self, repo: &RepoRecord, commit_sha: &str) -> Result<SandboxHandle> {
        if !tokio::fs::try_exists(&repo.checkout).await.unwrap_or(false) {
            return Err(anyhow!(
                "checkout {} does not exist",
                repo.checkout.display()
            ));
        }
        Ok(SandboxHandle {
            id: format!("{}-in-place", repo.id),
            repo_id: repo.id.clone(),
            commit_sha: commit_sha.to_string(),
            workdir: repo.checkout.clone(),
            source: repo.checkout.clone(),
        })
    }

    async fn release(&self, _handle: SandboxHandle) -> Result<()> {
        Ok(())
    }
}
