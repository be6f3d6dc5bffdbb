//! HTTP route handlers for the engine API.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use engine::error::EngineError;
use engine::model::{Run, StoryResult};
use engine::orchestrate::{EventOutcome, ExecuteOutcome};
use engine::trigger::RepositoryEvent;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(post_event))
        .route("/repos/{repo_id}/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/results/{result_id}", get(get_result))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    /// Block until the run finishes and return its outcome.
    #[serde(default)]
    pub wait: bool,
}

/// POST /api/events - feed a repository event through the trigger guard.
///
/// Returns 202 immediately and evaluates in the background unless `?wait=true`.
async fn post_event(
    State(state): State<AppState>,
    Query(params): Query<EventParams>,
    Json(event): Json<RepositoryEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !params.wait {
        let engine = state.engine.clone();
        tokio::spawn(async move {
            match engine.handle_event(&event).await {
                Ok(outcome) => info!(outcome = %outcome_json(&outcome), "event handled"),
                Err(err) => error!(err = %err, "event handling failed"),
            }
        });
        return Ok((StatusCode::ACCEPTED, Json(json!({ "outcome": "accepted" }))));
    }

    let outcome = state.engine.handle_event(&event).await.map_err(engine_error)?;
    Ok((StatusCode::OK, Json(outcome_json(&outcome))))
}

/// GET /api/repos/{repo_id}/runs - runs for a repository, newest first.
async fn list_runs(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let runs = state
        .engine
        .store()
        .list_runs(&repo_id)
        .await
        .map_err(store_error)?;
    Ok(Json(runs))
}

/// GET /api/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    state
        .engine
        .store()
        .get_run(&run_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found("run", &run_id))
}

/// GET /api/results/{result_id}
async fn get_result(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
) -> Result<Json<StoryResult>, ApiError> {
    state
        .engine
        .store()
        .get_result(&result_id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found("result", &result_id))
}

fn outcome_json(outcome: &EventOutcome) -> Value {
    match outcome {
        EventOutcome::Ignored(reason) => json!({
            "outcome": "ignored",
            "reason": reason.to_string(),
        }),
        EventOutcome::Executed(ExecuteOutcome::AlreadyRunning(run)) => json!({
            "outcome": "already_running",
            "run_id": run.id,
        }),
        EventOutcome::Executed(ExecuteOutcome::Completed(summary)) => json!({
            "outcome": "completed",
            "run": summary,
        }),
    }
}

fn engine_error(err: EngineError) -> ApiError {
    let status = match err {
        EngineError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::SandboxProvisioning(_) | EngineError::Catalog(_) | EngineError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error!(err = %err, "request failed");
    (status, Json(json!({ "error": err.to_string() })))
}

fn store_error(err: anyhow::Error) -> ApiError {
    engine_error(EngineError::Store(err))
}

fn not_found(kind: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{kind} '{id}' not found") })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine::core::types::Status;
    use engine::io::catalog::MemoryCatalog;
    use engine::io::run_store::{MemoryRunStore, RunStore};
    use engine::observer::BroadcastObserver;
    use engine::orchestrate::{Engine, EngineParts};
    use engine::test_support::{
        FailingStoryRunner, FlakyCheckApi, RecordingSandbox, sample_repo, sample_result,
        sample_run, sample_stories,
    };
    use engine::trigger::PullRequestAction;

    use super::*;

    fn app_state() -> (AppState, Arc<MemoryRunStore>) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add_repo(sample_repo("r1")).expect("repo");
        for story in sample_stories("r1", 2) {
            catalog.add_story(story).expect("story");
        }
        let store = Arc::new(MemoryRunStore::new());
        let observer = BroadcastObserver::new(16);
        let event_tx = observer.sender();
        let engine = Engine::new(EngineParts {
            catalog,
            store: store.clone(),
            sandbox: Arc::new(RecordingSandbox::default()),
            checks: Arc::new(FlakyCheckApi::new()),
            runner: Arc::new(FailingStoryRunner::erroring(&["s2"])),
            observer: Arc::new(observer),
            max_concurrency: 2,
        });
        (AppState::new(Arc::new(engine), event_tx), store)
    }

    fn opened(repository: &str) -> RepositoryEvent {
        RepositoryEvent::PullRequest {
            repository: repository.to_string(),
            action: PullRequestAction::Opened,
            number: 3,
            branch: "feature".to_string(),
            head_sha: "abc123".to_string(),
            commit_message: String::new(),
        }
    }

    #[tokio::test]
    async fn waiting_event_returns_completed_run() {
        let (state, store) = app_state();
        let (status, Json(body)) = post_event(
            State(state),
            Query(EventParams { wait: true }),
            Json(opened("acme/r1")),
        )
        .await
        .expect("post");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert_eq!(body["run"]["status"], "error");
        assert_eq!(body["run"]["summary"], "1 passed, 0 failed, 1 errors");
        assert_eq!(store.list_runs("r1").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn unknown_repository_is_ignored() {
        let (state, _) = app_state();
        let (_, Json(body)) = post_event(
            State(state),
            Query(EventParams { wait: true }),
            Json(opened("acme/unknown")),
        )
        .await
        .expect("post");
        assert_eq!(body["outcome"], "ignored");
        assert_eq!(body["reason"], "repository acme/unknown is not registered");
    }

    #[tokio::test]
    async fn background_event_is_accepted() {
        let (state, _) = app_state();
        let mut rx = state.event_tx.subscribe();
        let (status, _) = post_event(
            State(state),
            Query(EventParams::default()),
            Json(opened("acme/r1")),
        )
        .await
        .expect("post");
        assert_eq!(status, StatusCode::ACCEPTED);

        let first = rx.recv().await.expect("run event");
        assert!(matches!(
            first,
            engine::observer::RunEvent::RunStarted { number: 1, .. }
        ));
    }

    #[tokio::test]
    async fn run_and_result_lookups() {
        let (state, store) = app_state();
        let run = sample_run("r1", 1, &["s1"]);
        store.insert_run(run.clone()).await.expect("insert");
        let result_id = store
            .insert_result(sample_result(&run.id, "s1"))
            .await
            .expect("result");

        let Json(found) = get_run(State(state.clone()), Path(run.id.clone()))
            .await
            .expect("run");
        assert_eq!(found.status, Status::Running);

        let Json(runs) = list_runs(State(state.clone()), Path("r1".to_string()))
            .await
            .expect("runs");
        assert_eq!(runs.len(), 1);

        let Json(result) = get_result(State(state.clone()), Path(result_id))
            .await
            .expect("result");
        assert_eq!(result.story_id, "s1");

        let (status, _) = get_run(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
