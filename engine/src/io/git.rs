//! Git adapter for sandbox provisioning.
//!
//! Sandboxes are detached worktrees of a registered checkout, so we keep a
//! small, explicit wrapper around the few `git` subprocess calls involved.

use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Resolve a revision to its full commit SHA.
    pub async fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run_capture(&["rev-parse", "--verify", &spec]).await?;
        Ok(out.trim().to_string())
    }

    /// Add a detached worktree at `path` checked out at `commit`.
    #[instrument(skip_all, fields(path = %path.display(), commit = %commit))]
    pub async fn worktree_add_detached(&self, path: &Path, commit: &str) -> Result<()> {
        let path_arg = path_arg(path)?;
        debug!("adding detached worktree");
        self.run_checked(&["worktree", "add", "--detach", path_arg, commit])
            .await?;
        Ok(())
    }

    /// Remove a worktree, discarding any local modifications.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_arg = path_arg(path)?;
        debug!("removing worktree");
        self.run_checked(&["worktree", "remove", "--force", path_arg])
            .await?;
        Ok(())
    }

    /// Drop administrative entries for worktrees whose directories are gone.
    pub async fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"]).await?;
        Ok(())
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid utf-8: {}", path.display()))
}
