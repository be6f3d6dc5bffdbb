//! Best-effort status reporting to the check-run API.
//!
//! Nothing here returns an error: failures are logged and surface as `None`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::core::check_run::{CheckRunContent, CheckRunId, completed_content, started_content};
use crate::core::types::{Counts, Status};
use crate::io::check_api::CheckRunApi;
use crate::model::{RepoRecord, Run, StoryRunEntry};

#[derive(Clone)]
pub struct CheckRunReporter {
    api: Arc<dyn CheckRunApi>,
}

impl CheckRunReporter {
    pub fn new(api: Arc<dyn CheckRunApi>) -> Self {
        Self { api }
    }

    /// Open an `in_progress` check for the run's commit.
    pub async fn start(
        &self,
        repo: &RepoRecord,
        run: &Run,
        story_count: usize,
    ) -> Option<CheckRunId> {
        let content = started_content(run, story_count);
        self.submit(repo, &run.commit_sha, None, &content).await
    }

    /// Complete the check with the run verdict.
    pub async fn complete(
        &self,
        repo: &RepoRecord,
        run: &Run,
        existing: Option<CheckRunId>,
        final_status: Status,
        counts: &Counts,
        entries: &[StoryRunEntry],
    ) -> Option<CheckRunId> {
        let content = completed_content(run, final_status, counts, entries);
        self.submit(repo, &run.commit_sha, existing, &content).await
    }

    /// Update `existing` when present, falling back to create if the update fails.
    #[instrument(skip_all, fields(repo = %repo.full_name, existing = ?existing.map(|id| id.0), status = ?content.status))]
    pub async fn submit(
        &self,
        repo: &RepoRecord,
        commit_sha: &str,
        existing: Option<CheckRunId>,
        content: &CheckRunContent,
    ) -> Option<CheckRunId> {
        if let Some(id) = existing {
            match self.api.update(repo, id, content).await {
                Ok(()) => {
                    info!(check_run_id = %id, "check run updated");
                    return Some(id);
                }
                Err(err) => {
                    warn!(
                        check_run_id = %id,
                        err = %format!("{err:#}"),
                        "check run update failed, creating a new one"
                    );
                }
            }
        }
        match self.api.create(repo, commit_sha, content).await {
            Ok(id) => {
                info!(check_run_id = %id, "check run created");
                Some(id)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "check run create failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyCheckApi, sample_repo, sample_run};

    #[tokio::test]
    async fn update_failure_falls_back_to_create() {
        let api = Arc::new(FlakyCheckApi::new().fail_updates());
        let reporter = CheckRunReporter::new(api.clone());
        let run = sample_run("r1", 1, &["s1"]);
        let content = started_content(&run, 1);

        let id = reporter
            .submit(&sample_repo("r1"), &run.commit_sha, Some(CheckRunId(123)), &content)
            .await;

        assert_eq!(id, Some(CheckRunId(1000)));
        assert_eq!(api.calls(), vec!["update 123", "create 1000"]);
    }

    #[tokio::test]
    async fn update_success_keeps_id() {
        let api = Arc::new(FlakyCheckApi::new());
        let reporter = CheckRunReporter::new(api.clone());
        let run = sample_run("r1", 1, &["s1"]);
        let id = reporter
            .complete(
                &sample_repo("r1"),
                &run,
                Some(CheckRunId(5)),
                Status::Pass,
                &Counts {
                    pass: 1,
                    fail: 0,
                    error: 0,
                },
                &run.stories,
            )
            .await;
        assert_eq!(id, Some(CheckRunId(5)));
        assert_eq!(api.calls(), vec!["update 5"]);
    }

    #[tokio::test]
    async fn create_failure_returns_none() {
        let api = Arc::new(FlakyCheckApi::new().fail_creates());
        let reporter = CheckRunReporter::new(api.clone());
        let run = sample_run("r1", 1, &["s1"]);
        assert_eq!(reporter.start(&sample_repo("r1"), &run, 1).await, None);
        assert_eq!(api.calls(), vec!["create failed"]);
    }

    #[tokio::test]
    async fn both_failing_returns_none() {
        let api = Arc::new(FlakyCheckApi::new().fail_updates().fail_creates());
        let reporter = CheckRunReporter::new(api.clone());
        let run = sample_run("r1", 1, &[]);
        let content = started_content(&run, 0);
        let id = reporter
            .submit(&sample_repo("r1"), "abc", Some(CheckRunId(9)), &content)
            .await;
        assert_eq!(id, None);
        assert_eq!(api.calls(), vec!["update 9", "create failed"]);
    }
}
