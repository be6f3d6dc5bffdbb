//! Decides whether a repository event starts a run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::controller::{NewRun, RunController};
use crate::error::EngineError;
use crate::io::catalog::{Catalog, PullRequestRef};

/// Repository event as delivered by the webhook layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepositoryEvent {
    PullRequest {
        /// `owner/name`.
        repository: String,
        action: PullRequestAction,
        number: u64,
        branch: String,
        head_sha: String,
        #[serde(default)]
        commit_message: String,
    },
    Push {
        repository: String,
        /// Branch name, with or without `refs/heads/`.
        branch: String,
        head_sha: String,
        #[serde(default)]
        commit_message: String,
    },
}

impl RepositoryEvent {
    pub fn repository(&self) -> &str {
        match self {
            RepositoryEvent::PullRequest { repository, .. }
            | RepositoryEvent::Push { repository, .. } => repository,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    #[serde(other)]
    Other,
}

/// A commit the engine should evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub repo_id: String,
    pub pr_number: Option<u64>,
    pub branch_name: String,
    pub commit_sha: String,
    pub commit_message: String,
}

impl From<RunRequest> for NewRun {
    fn from(request: RunRequest) -> Self {
        NewRun {
            repo_id: request.repo_id,
            pr_number: request.pr_number,
            branch_name: request.branch_name,
            commit_sha: request.commit_sha,
            commit_message: request.commit_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownRepository(String),
    RepositoryDisabled(String),
    PullRequestClosed(u64),
    UnsupportedAction,
    RunInProgress { run_id: String },
    /// The pushed branch is covered by this pull request's runs.
    OpenPullRequest(u64),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnknownRepository(name) => write!(f, "repository {name} is not registered"),
            IgnoreReason::RepositoryDisabled(name) => write!(f, "repository {name} is disabled"),
            IgnoreReason::PullRequestClosed(number) => write!(f, "pull request #{number} closed"),
            IgnoreReason::UnsupportedAction => f.write_str("pull request action not handled"),
            IgnoreReason::RunInProgress { run_id } => write!(f, "run {run_id} is still running"),
            IgnoreReason::OpenPullRequest(number) => {
                write!(f, "branch has open pull request #{number}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Start(RunRequest),
    Ignore(IgnoreReason),
}

#[derive(Clone)]
pub struct TriggerGuard {
    catalog: Arc<dyn Catalog>,
    controller: RunController,
}

impl TriggerGuard {
    pub fn new(catalog: Arc<dyn Catalog>, controller: RunController) -> Self {
        Self {
            catalog,
            controller,
        }
    }

    /// Catalog failures surface as [`EngineError::Catalog`], run lookups as
    /// [`EngineError::Store`].
    #[instrument(skip_all, fields(repository = %event.repository()))]
    pub async fn decide(&self, event: &RepositoryEvent) -> Result<TriggerDecision, EngineError> {
        let Some(repo) = self
            .catalog
            .repo_by_name(event.repository())
            .await
            .map_err(EngineError::Catalog)?
        else {
            return Ok(ignore(IgnoreReason::UnknownRepository(
                event.repository().to_string(),
            )));
        };
        if !repo.enabled {
            return Ok(ignore(IgnoreReason::RepositoryDisabled(repo.full_name)));
        }

        match event {
            RepositoryEvent::PullRequest {
                action,
                number,
                branch,
                head_sha,
                commit_message,
                ..
            } => {
                let pr = PullRequestRef {
                    number: *number,
                    branch: branch.clone(),
                };
                match action {
                    PullRequestAction::Closed => {
                        self.catalog
                            .record_pull_request(&repo.id, pr, false)
                            .await
                            .map_err(EngineError::Catalog)?;
                        return Ok(ignore(IgnoreReason::PullRequestClosed(*number)));
                    }
                    PullRequestAction::Other => {
                        return Ok(ignore(IgnoreReason::UnsupportedAction));
                    }
                    PullRequestAction::Opened
                    | PullRequestAction::Reopened
                    | PullRequestAction::Synchronize => {}
                }
                self.catalog
                    .record_pull_request(&repo.id, pr, true)
                    .await
                    .map_err(EngineError::Catalog)?;
                let active = self
                    .controller
                    .find_active_run(&repo.id, *number)
                    .await
                    .map_err(EngineError::Store)?;
                if let Some(active) = active {
                    return Ok(ignore(IgnoreReason::RunInProgress { run_id: active.id }));
                }
                Ok(start(RunRequest {
                    repo_id: repo.id,
                    pr_number: Some(*number),
                    branch_name: branch.clone(),
                    commit_sha: head_sha.clone(),
                    commit_message: commit_message.clone(),
                }))
            }
            RepositoryEvent::Push {
                branch,
                head_sha,
                commit_message,
                ..
            } => {
                let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                let open = self
                    .catalog
                    .open_pull_request(&repo.id, branch)
                    .await
                    .map_err(EngineError::Catalog)?;
                if let Some(number) = open {
                    return Ok(ignore(IgnoreReason::OpenPullRequest(number)));
                }
                Ok(start(RunRequest {
                    repo_id: repo.id,
                    pr_number: None,
                    branch_name: branch.to_string(),
                    commit_sha: head_sha.clone(),
                    commit_message: commit_message.clone(),
                }))
            }
        }
    }
}

fn ignore(reason: IgnoreReason) -> TriggerDecision {
    info!(%reason, "event ignored");
    TriggerDecision::Ignore(reason)
}

fn start(request: RunRequest) -> TriggerDecision {
    info!(repo_id = %request.repo_id, commit_sha = %request.commit_sha, "run requested");
    TriggerDecision::Start(request)
}
