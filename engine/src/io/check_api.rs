//! Status-check API adapters.
//!
//! [`CheckRunApi`] is the fallible seam the reporter writes through. The
//! reporter owns the best-effort policy; adapters just return errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::check_run::{CheckRunContent, CheckRunId};
use crate::model::RepoRecord;

#[async_trait]
pub trait CheckRunApi: Send + Sync {
    async fn create(
        &self,
        repo: &RepoRecord,
        commit_sha: &str,
        content: &CheckRunContent,
    ) -> Result<CheckRunId>;

    async fn update(
        &self,
        repo: &RepoRecord,
        id: CheckRunId,
        content: &CheckRunContent,
    ) -> Result<()>;
}

/// GitHub checks API (`/repos/{owner}/{repo}/check-runs`).
#[derive(Debug, Clone)]
pub struct GithubCheckRuns {
    client: reqwest::Client,
    api_base: String,
    token: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    head_sha: &'a str,
    #[serde(flatten)]
    content: &'a CheckRunContent,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    name: &'a str,
    #[serde(flatten)]
    content: &'a CheckRunContent,
}

#[derive(Debug, Deserialize)]
struct CreatedCheckRun {
    id: u64,
}

impl GithubCheckRuns {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("storycheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            name: name.into(),
        })
    }

    fn check_runs_url(&self, repo: &RepoRecord) -> Result<String> {
        let (owner, name) = repo
            .owner_and_name()
            .ok_or_else(|| anyhow!("repo '{}' has invalid full_name", repo.id))?;
        Ok(format!("{}/repos/{owner}/{name}/check-runs", self.api_base))
    }
}

#[async_trait]
impl CheckRunApi for GithubCheckRuns {
    #[instrument(skip_all, fields(repo = %repo.full_name, commit_sha = %commit_sha))]
    async fn create(
        &self,
        repo: &RepoRecord,
        commit_sha: &str,
        content: &CheckRunContent,
    ) -> Result<CheckRunId> {
        let url = self.check_runs_url(repo)?;
        let created: CreatedCheckRun = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&CreateBody {
                name: &self.name,
                head_sha: commit_sha,
                content,
            })
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .context("create check run")?
            .json()
            .await
            .context("decode created check run")?;
        debug!(check_run_id = created.id, "check run created");
        Ok(CheckRunId(created.id))
    }

    #[instrument(skip_all, fields(repo = %repo.full_name, check_run_id = %id))]
    async fn update(
        &self,
        repo: &RepoRecord,
        id: CheckRunId,
        content: &CheckRunContent,
    ) -> Result<()> {
        let url = format!("{}/{id}", self.check_runs_url(repo)?);
        self.client
            .patch(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&UpdateBody {
                name: &self.name,
                content,
            })
            .send()
            .await
            .with_context(|| format!("PATCH {url}"))?
            .error_for_status()
            .context("update check run")?;
        debug!("check run updated");
        Ok(())
    }
}

/// Logs check-run payloads instead of calling a remote API.
#[derive(Debug, Default)]
pub struct LogCheckRuns {
    next_id: AtomicU64,
}

impl LogCheckRuns {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckRunApi for LogCheckRuns {
    async fn create(
        &self,
        repo: &RepoRecord,
        commit_sha: &str,
        content: &CheckRunContent,
    ) -> Result<CheckRunId> {
        let id = CheckRunId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(
            repo = %repo.full_name,
            commit_sha,
            check_run_id = %id,
            status = ?content.status,
            title = %content.output.title,
            "check run created"
        );
        Ok(id)
    }

    async fn update(
        &self,
        repo: &RepoRecord,
        id: CheckRunId,
        content: &CheckRunContent,
    ) -> Result<()> {
        info!(
            repo = %repo.full_name,
            check_run_id = %id,
            status = ?content.status,
            conclusion = ?content.conclusion,
            title = %content.output.title,
            "check run updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check_run::started_content;
    use crate::test_support::{sample_repo, sample_run};

    #[tokio::test]
    async fn log_check_runs_hands_out_increasing_ids() {
        let api = LogCheckRuns::new();
        let repo = sample_repo("r1");
        let run = sample_run("r1", 1, &["s1"]);
        let content = started_content(&run, 1);
        let first = api.create(&repo, "abc", &content).await.expect("create");
        let second = api.create(&repo, "abc", &content).await.expect("create");
        assert_eq!(first, CheckRunId(1));
        assert_eq!(second, CheckRunId(2));
        api.update(&repo, first, &content).await.expect("update");
    }

    #[test]
    fn create_body_flattens_content() {
        let run = sample_run("r1", 1, &["s1"]);
        let content = started_content(&run, 1);
        let value = serde_json::to_value(CreateBody {
            name: "storycheck",
            head_sha: "abc",
            content: &content,
        })
        .expect("serialize");
        assert_eq!(value["name"], "storycheck");
        assert_eq!(value["head_sha"], "abc");
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["output"]["title"], "Evaluating 1 story");
    }

    #[test]
    fn url_requires_owner_and_name() {
        let api = GithubCheckRuns::new("https://api.example.com/", "t", "storycheck").expect("client");
        let mut repo = sample_repo("r1");
        assert_eq!(
            api.check_runs_url(&repo).expect("url"),
            "https://api.example.com/repos/acme/r1/check-runs"
        );
        repo.full_name = "no-slash".to_string();
        assert!(api.check_runs_url(&repo).is_err());
    }
}
