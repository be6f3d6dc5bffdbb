//! End-to-end run execution.
//!
//! Flow: guard → create run → start check → provision sandbox → dispatch
//! stories → aggregate → persist → complete check. Only [`Engine::execute`]
//! writes a run's terminal status.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::controller::{CreateOutcome, FailureStatus, RunController};
use crate::core::aggregate::aggregate;
use crate::core::check_run::CheckRunId;
use crate::core::types::{Counts, Status};
use crate::dispatch::{Dispatcher, StoryRunner};
use crate::error::EngineError;
use crate::io::catalog::Catalog;
use crate::io::check_api::CheckRunApi;
use crate::io::run_store::RunStore;
use crate::io::sandbox::{SandboxProvider, with_sandbox};
use crate::model::{NO_STORIES_SUMMARY, RepoRecord, Run, Settled, Story};
use crate::observer::RunObserver;
use crate::reporter::CheckRunReporter;
use crate::trigger::{IgnoreReason, RepositoryEvent, RunRequest, TriggerDecision, TriggerGuard};

/// Collaborators an [`Engine`] is assembled from.
pub struct EngineParts {
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<dyn RunStore>,
    pub sandbox: Arc<dyn SandboxProvider>,
    pub checks: Arc<dyn CheckRunApi>,
    pub runner: Arc<dyn StoryRunner>,
    pub observer: Arc<dyn RunObserver>,
    pub max_concurrency: usize,
}

/// Outcome of one finished run, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub repo_id: String,
    pub number: u64,
    pub status: Status,
    pub summary: String,
    pub counts: Counts,
    pub check_run_id: Option<CheckRunId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Completed(RunSummary),
    /// The pull request already has a running run; nothing was created.
    AlreadyRunning(Run),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    Executed(ExecuteOutcome),
}

pub struct Engine {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn RunStore>,
    controller: RunController,
    guard: TriggerGuard,
    sandbox: Arc<dyn SandboxProvider>,
    reporter: CheckRunReporter,
    runner: Arc<dyn StoryRunner>,
    observer: Arc<dyn RunObserver>,
    dispatcher: Dispatcher,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let controller = RunController::new(parts.store.clone());
        Self {
            guard: TriggerGuard::new(parts.catalog.clone(), controller.clone()),
            catalog: parts.catalog,
            store: parts.store,
            controller,
            sandbox: parts.sandbox,
            reporter: CheckRunReporter::new(parts.checks),
            runner: parts.runner,
            observer: parts.observer,
            dispatcher: Dispatcher::new(parts.max_concurrency),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run the trigger guard and, when it allows, execute the run.
    #[instrument(skip_all, fields(repository = %event.repository()))]
    pub async fn handle_event(&self, event: &RepositoryEvent) -> Result<EventOutcome, EngineError> {
        match self.guard.decide(event).await? {
            TriggerDecision::Ignore(reason) => Ok(EventOutcome::Ignored(reason)),
            TriggerDecision::Start(request) => {
                self.execute(request).await.map(EventOutcome::Executed)
            }
        }
    }

    /// Create and evaluate one run.
    ///
    /// Returns `Err` only for configuration and catalog errors (nothing
    /// persisted) and store failures. A sandbox that cannot be provisioned yields a completed
    /// run with status `error`.
    #[instrument(skip_all, fields(repo_id = %request.repo_id, commit_sha = %request.commit_sha))]
    pub async fn execute(&self, request: RunRequest) -> Result<ExecuteOutcome, EngineError> {
        let repo = self
            .catalog
            .repo(&request.repo_id)
            .await
            .map_err(EngineError::Catalog)?
            .ok_or_else(|| {
                EngineError::configuration(format!("repo '{}' not found", request.repo_id))
            })?;
        if !repo.enabled {
            return Err(EngineError::configuration(format!(
                "repo '{}' is disabled",
                repo.id
            )));
        }
        let stories: Vec<Story> = self
            .catalog
            .stories(&repo.id)
            .await
            .map_err(EngineError::Catalog)?
            .into_iter()
            .filter(|story| story.enabled)
            .collect();

        let run = match self
            .controller
            .create_run_if_idle(request.into(), &stories)
            .await
            .map_err(EngineError::Store)?
        {
            CreateOutcome::Created(run) => run,
            CreateOutcome::AlreadyRunning(run) => {
                info!(run_id = %run.id, "run already in progress");
                return Ok(ExecuteOutcome::AlreadyRunning(run));
            }
        };
        self.observer.on_run_start(&run);

        if stories.is_empty() {
            let check_run_id = self
                .reporter
                .complete(&repo, &run, None, Status::Skipped, &Counts::default(), &[])
                .await;
            return Ok(ExecuteOutcome::Completed(
                self.finish(&run, Status::Skipped, NO_STORIES_SUMMARY, Counts::default(), check_run_id),
            ));
        }

        let check_run_id = self.reporter.start(&repo, &run, stories.len()).await;

        let runner = self.runner.as_ref();
        let observer = self.observer.as_ref();
        let dispatcher = self.dispatcher;
        let run_ref = &run;
        let story_slice = stories.as_slice();
        let dispatched = with_sandbox(
            self.sandbox.as_ref(),
            &repo,
            &run.commit_sha,
            move |handle| async move {
                dispatcher
                    .dispatch(runner, run_ref, story_slice, &handle, observer)
                    .await
            },
        )
        .await;

        let settled = match dispatched {
            Ok(settled) => settled,
            Err(EngineError::SandboxProvisioning(err)) => {
                return self.fail_provisioning(&repo, &run, check_run_id, &err).await;
            }
            Err(other) => return Err(other),
        };

        self.record(&repo, &run, check_run_id, &settled)
            .await
            .map(ExecuteOutcome::Completed)
    }

    async fn record(
        &self,
        repo: &RepoRecord,
        run: &Run,
        check_run_id: Option<CheckRunId>,
        settled: &[Settled],
    ) -> Result<RunSummary, EngineError> {
        let mut entries = run.stories.clone();
        for (entry, outcome) in entries.iter_mut().zip(settled) {
            entry.settle(outcome);
        }
        let verdict = aggregate(settled.iter().map(Settled::status));
        let summary = verdict.summary_text();

        if let Err(err) = self
            .controller
            .update_run_result(&run.id, verdict.final_status, &summary, entries.clone())
            .await
        {
            error!(run_id = %run.id, err = %format!("{err:#}"), "failed to record run result");
            let failure = format!("failed to record run result: {err:#}");
            if let Err(mark_err) = self
                .controller
                .mark_run_failure(&run.id, &failure, FailureStatus::Error)
                .await
            {
                warn!(run_id = %run.id, err = %format!("{mark_err:#}"), "failed to mark run failure");
            }
            self.reporter
                .complete(repo, run, check_run_id, Status::Error, &verdict.counts, &entries)
                .await;
            self.observer.on_run_complete(&run.id, Status::Error, &failure);
            return Err(EngineError::Store(err));
        }

        let check_run_id = self
            .reporter
            .complete(
                repo,
                run,
                check_run_id,
                verdict.final_status,
                &verdict.counts,
                &entries,
            )
            .await;
        Ok(self.finish(run, verdict.final_status, &summary, verdict.counts, check_run_id))
    }

    async fn fail_provisioning(
        &self,
        repo: &RepoRecord,
        run: &Run,
        check_run_id: Option<CheckRunId>,
        err: &anyhow::Error,
    ) -> Result<ExecuteOutcome, EngineError> {
        let summary = format!("sandbox provisioning failed: {err:#}");
        error!(run_id = %run.id, %summary, "run aborted");
        let marked = self
            .controller
            .mark_run_failure(&run.id, &summary, FailureStatus::Error)
            .await;
        let check_run_id = self
            .reporter
            .complete(repo, run, check_run_id, Status::Error, &Counts::default(), &run.stories)
            .await;
        if let Err(mark_err) = marked {
            error!(run_id = %run.id, err = %format!("{mark_err:#}"), "failed to mark run failure");
            self.observer.on_run_complete(&run.id, Status::Error, &summary);
            return Err(EngineError::Store(mark_err));
        }
        Ok(ExecuteOutcome::Completed(self.finish(
            run,
            Status::Error,
            &summary,
            Counts::default(),
            check_run_id,
        )))
    }

    fn finish(
        &self,
        run: &Run,
        status: Status,
        summary: &str,
        counts: Counts,
        check_run_id: Option<CheckRunId>,
    ) -> RunSummary {
        self.observer.on_run_complete(&run.id, status, summary);
        info!(run_id = %run.id, number = run.number, %status, summary, "run finished");
        RunSummary {
            run_id: run.id.clone(),
            repo_id: run.repo_id.clone(),
            number: run.number,
            status,
            summary: summary.to_string(),
            counts,
            check_run_id,
        }
    }
}
