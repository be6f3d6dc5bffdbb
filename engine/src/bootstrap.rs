//! Assemble an [`Engine`] from `storycheck.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::agents::AgentSet;
use crate::evaluate::StoryEvaluator;
use crate::io::catalog::MemoryCatalog;
use crate::io::check_api::{CheckRunApi, GithubCheckRuns, LogCheckRuns};
use crate::io::config::{EngineConfig, SandboxKind};
use crate::io::run_store::{FileRunStore, RunStore};
use crate::io::sandbox::{InPlaceSandbox, SandboxProvider, WorktreeSandbox};
use crate::observer::RunObserver;
use crate::orchestrate::{Engine, EngineParts};

impl Engine {
    /// Build the production engine.
    ///
    /// Relative paths in `cfg` resolve against `config_dir`. Check runs go to
    /// the GitHub API when the configured token variable is set, otherwise to
    /// the log.
    pub fn from_config(
        cfg: &EngineConfig,
        config_dir: &Path,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Self> {
        cfg.validate()?;
        let cfg = resolve_paths(cfg, config_dir);

        let catalog = Arc::new(
            MemoryCatalog::from_config(&cfg, config_dir)?
                .with_pull_request_file(cfg.pull_requests_path())
                .context("open pull request state")?,
        );
        let store: Arc<dyn RunStore> = Arc::new(
            FileRunStore::open(cfg.ledger_path()).context("open run ledger")?,
        );
        let sandbox: Arc<dyn SandboxProvider> = match cfg.sandbox.kind {
            SandboxKind::Worktree => Arc::new(WorktreeSandbox::new(cfg.scratch_dir())),
            SandboxKind::InPlace => Arc::new(InPlaceSandbox),
        };
        let checks = check_api(&cfg)?;
        let agents = AgentSet::from_config(&cfg)?;
        let runner = Arc::new(StoryEvaluator::new(agents, store.clone(), observer.clone()));

        info!(
            state_dir = %cfg.state_dir.display(),
            repos = cfg.repos.len(),
            provider = ?cfg.agent.provider,
            sandbox = ?cfg.sandbox.kind,
            max_concurrency = cfg.max_concurrency,
            "engine configured"
        );
        Ok(Engine::new(EngineParts {
            catalog,
            store,
            sandbox,
            checks,
            runner,
            observer,
            max_concurrency: cfg.max_concurrency,
        }))
    }
}

/// Copy of `cfg` with relative `state_dir` and repo checkouts joined onto `config_dir`.
pub fn resolve_paths(cfg: &EngineConfig, config_dir: &Path) -> EngineConfig {
    let mut resolved = cfg.clone();
    resolved.state_dir = resolve(config_dir, &cfg.state_dir);
    for repo in &mut resolved.repos {
        repo.checkout = resolve(config_dir, &repo.checkout);
    }
    resolved
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn check_api(cfg: &EngineConfig) -> Result<Arc<dyn CheckRunApi>> {
    match std::env::var(&cfg.checks.token_env) {
        Ok(token) if !token.trim().is_empty() => Ok(Arc::new(GithubCheckRuns::new(
            cfg.checks.api_base.clone(),
            token,
            cfg.checks.name.clone(),
        )?)),
        _ => {
            info!(
                token_env = %cfg.checks.token_env,
                "no check-run token configured, reporting to log"
            );
            Ok(Arc::new(LogCheckRuns::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{ChecksConfig, RepoConfig};
    use crate::observer::NoopObserver;
    use crate::orchestrate::{EventOutcome, ExecuteOutcome};
    use crate::trigger::{IgnoreReason, PullRequestAction, RepositoryEvent};

    #[test]
    fn resolves_state_dir_and_checkouts_against_config_dir() {
        let cfg = EngineConfig {
            repos: vec![RepoConfig {
                id: "r1".to_string(),
                full_name: "acme/r1".to_string(),
                checkout: PathBuf::from("checkouts/r1"),
                enabled: true,
                stories_file: None,
            }],
            ..EngineConfig::default()
        };
        let resolved = resolve_paths(&cfg, Path::new("/etc/storycheck"));
        assert_eq!(resolved.state_dir, Path::new("/etc/storycheck/.storycheck"));
        assert_eq!(
            resolved.repos[0].checkout,
            Path::new("/etc/storycheck/checkouts/r1")
        );
        assert_eq!(
            resolved.ledger_path(),
            Path::new("/etc/storycheck/.storycheck/runs.json")
        );
    }

    #[tokio::test]
    async fn from_config_builds_engine_with_catalog() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join("stories.json"),
            r#"[{"id": "s1", "title": "Login", "text": "Users can log in"}]"#,
        )
        .expect("write stories");
        let cfg = EngineConfig {
            repos: vec![RepoConfig {
                id: "r1".to_string(),
                full_name: "acme/r1".to_string(),
                checkout: PathBuf::from("."),
                enabled: true,
                stories_file: Some(PathBuf::from("stories.json")),
            }],
            ..EngineConfig::default()
        };

        let engine =
            Engine::from_config(&cfg, temp.path(), Arc::new(NoopObserver)).expect("engine");
        let stories = engine.catalog().stories("r1").await.expect("stories");
        assert_eq!(stories.len(), 1);
        assert!(engine.store().list_runs("r1").await.expect("list").is_empty());
    }

    /// A push to a branch whose PR was opened by an earlier process is still skipped.
    #[tokio::test]
    async fn open_pull_request_guard_survives_restart() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = EngineConfig {
            repos: vec![RepoConfig {
                id: "r1".to_string(),
                full_name: "acme/r1".to_string(),
                checkout: PathBuf::from("."),
                enabled: true,
                stories_file: None,
            }],
            checks: ChecksConfig {
                token_env: "STORYCHECK_TEST_TOKEN_NEVER_SET".to_string(),
                ..ChecksConfig::default()
            },
            ..EngineConfig::default()
        };

        let first = Engine::from_config(&cfg, temp.path(), Arc::new(NoopObserver)).expect("engine");
        let opened = first
            .handle_event(&RepositoryEvent::PullRequest {
                repository: "acme/r1".to_string(),
                action: PullRequestAction::Opened,
                number: 3,
                branch: "feature".to_string(),
                head_sha: "abc123".to_string(),
                commit_message: String::new(),
            })
            .await
            .expect("pull request event");
        assert!(matches!(
            opened,
            EventOutcome::Executed(ExecuteOutcome::Completed(_))
        ));
        drop(first);

        let second =
            Engine::from_config(&cfg, temp.path(), Arc::new(NoopObserver)).expect("engine");
        let pushed = second
            .handle_event(&RepositoryEvent::Push {
                repository: "acme/r1".to_string(),
                branch: "refs/heads/feature".to_string(),
                head_sha: "abc123".to_string(),
                commit_message: String::new(),
            })
            .await
            .expect("push event");
        assert_eq!(pushed, EventOutcome::Ignored(IgnoreReason::OpenPullRequest(3)));
        assert_eq!(second.store().list_runs("r1").await.expect("list").len(), 1);
    }
}
