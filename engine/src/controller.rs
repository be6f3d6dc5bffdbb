//! Run lifecycle writes: creation with per-repo numbering, the per-PR guard,
//! and the single terminal write.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::types::Status;
use crate::io::run_store::{RunStore, RunUpdate};
use crate::model::{NO_STORIES_SUMMARY, Run, Story, StoryRunEntry};

/// Identity of the commit a new run evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub repo_id: String,
    pub pr_number: Option<u64>,
    pub branch_name: String,
    pub commit_sha: String,
    pub commit_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Run),
    /// A `running` run already exists for the pull request; nothing was written.
    AlreadyRunning(Run),
}

/// Terminal statuses allowed on the failure path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    Fail,
    Error,
}

impl From<FailureStatus> for Status {
    fn from(status: FailureStatus) -> Self {
        match status {
            FailureStatus::Fail => Status::Fail,
            FailureStatus::Error => Status::Error,
        }
    }
}

#[derive(Clone)]
pub struct RunController {
    store: Arc<dyn RunStore>,
}

impl RunController {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Insert a run numbered `max(existing) + 1` for its repository.
    ///
    /// The store assigns the number atomically with the insert, so concurrent
    /// creations for one repository each get a distinct number.
    ///
    /// Without stories the run is created terminal (`skipped`). Otherwise it is
    /// `running` with one entry per story, in input order.
    #[instrument(skip_all, fields(repo_id = %new_run.repo_id, stories = stories.len()))]
    pub async fn create_run(&self, new_run: NewRun, stories: &[Story]) -> Result<Run> {
        let now = Utc::now();
        let (status, summary, entries) = if stories.is_empty() {
            (Status::Skipped, Some(NO_STORIES_SUMMARY.to_string()), Vec::new())
        } else {
            let entries = stories
                .iter()
                .map(|story| StoryRunEntry::running(story.id.clone(), now))
                .collect();
            (Status::Running, None, entries)
        };
        let run = Run {
            id: Uuid::new_v4().to_string(),
            repo_id: new_run.repo_id,
            pr_number: new_run.pr_number,
            branch_name: new_run.branch_name,
            commit_sha: new_run.commit_sha,
            commit_message: new_run.commit_message,
            number: 0,
            status,
            summary,
            stories: entries,
            created_at: now,
            updated_at: now,
        };
        let run = self.store.insert_numbered(run).await?;
        info!(run_id = %run.id, number = run.number, %status, "run created");
        Ok(run)
    }

    /// The `running` run for `(repo_id, pr_number)`, if any.
    pub async fn find_active_run(&self, repo_id: &str, pr_number: u64) -> Result<Option<Run>> {
        self.store.find_running_run(repo_id, pr_number).await
    }

    /// Guard plus create. Two concurrent callers can both pass the guard.
    pub async fn create_run_if_idle(
        &self,
        new_run: NewRun,
        stories: &[Story],
    ) -> Result<CreateOutcome> {
        if let Some(pr_number) = new_run.pr_number
            && let Some(active) = self.find_active_run(&new_run.repo_id, pr_number).await?
        {
            debug!(run_id = %active.id, pr_number, "run already in progress");
            return Ok(CreateOutcome::AlreadyRunning(active));
        }
        self.create_run(new_run, stories)
            .await
            .map(CreateOutcome::Created)
    }

    /// Terminal write on the success path.
    #[instrument(skip_all, fields(run_id = %run_id, final_status = %final_status))]
    pub async fn update_run_result(
        &self,
        run_id: &str,
        final_status: Status,
        summary: &str,
        entries: Vec<StoryRunEntry>,
    ) -> Result<()> {
        self.store
            .update_run(
                run_id,
                RunUpdate {
                    status: final_status,
                    summary: summary.to_string(),
                    stories: Some(entries),
                    updated_at: Utc::now(),
                },
            )
            .await?;
        debug!("run result recorded");
        Ok(())
    }

    /// Overwrite the run's status and summary; story entries are left as they are.
    #[instrument(skip_all, fields(run_id = %run_id, status = ?status))]
    pub async fn mark_run_failure(
        &self,
        run_id: &str,
        summary: &str,
        status: FailureStatus,
    ) -> Result<()> {
        self.store
            .update_run(
                run_id,
                RunUpdate {
                    status: status.into(),
                    summary: summary.to_string(),
                    stories: None,
                    updated_at: Utc::now(),
                },
            )
            .await?;
        info!(summary, "run marked failed");
        Ok(())
    }
}
