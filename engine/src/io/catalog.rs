//! Repository and story lookup.
//!
//! Story discovery lives elsewhere; the engine only reads the registered
//! repositories, their stories, and which branches have open pull requests.
//! Open pull requests can be persisted so the push guard survives restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::config::EngineConfig;
use crate::model::{RepoRecord, Story};

/// Pull request identity as tracked by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub number: u64,
    pub branch: String,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn repo(&self, repo_id: &str) -> Result<Option<RepoRecord>>;
    async fn repo_by_name(&self, full_name: &str) -> Result<Option<RepoRecord>>;
    /// Stories registered for a repository, in catalog order.
    async fn stories(&self, repo_id: &str) -> Result<Vec<Story>>;
    /// Open pull request whose head is `branch`, if any.
    async fn open_pull_request(&self, repo_id: &str, branch: &str) -> Result<Option<u64>>;
    /// Record that a pull request was opened/updated (`open = true`) or closed.
    async fn record_pull_request(&self, repo_id: &str, pr: PullRequestRef, open: bool)
    -> Result<()>;
}

/// On-disk form of one open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OpenPullRequest {
    repo_id: String,
    branch: String,
    number: u64,
}

type OpenPrs = BTreeMap<(String, String), u64>;

#[derive(Debug, Default)]
struct CatalogState {
    repos: Vec<RepoRecord>,
    stories: Vec<Story>,
    /// `(repo_id, branch)` → PR number.
    open_prs: OpenPrs,
}

/// Catalog held in memory, typically seeded from `[[repos]]` in the config.
///
/// With [`MemoryCatalog::with_pull_request_file`], open pull requests are
/// rewritten atomically to that file after every change.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    pull_requests_path: Option<PathBuf>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config, loading each repo's `stories_file` relative to `config_dir`.
    pub fn from_config(cfg: &EngineConfig, config_dir: &Path) -> Result<Self> {
        let catalog = Self::new();
        for repo in &cfg.repos {
            catalog.add_repo(RepoRecord {
                id: repo.id.clone(),
                full_name: repo.full_name.clone(),
                checkout: repo.checkout.clone(),
                enabled: repo.enabled,
            })?;
            let Some(stories_file) = &repo.stories_file else {
                continue;
            };
            let path = if stories_file.is_absolute() {
                stories_file.clone()
            } else {
                config_dir.join(stories_file)
            };
            for story in load_stories(&path, &repo.id)? {
                catalog.add_story(story)?;
            }
        }
        Ok(catalog)
    }

    /// Load open pull requests from `path` (if it exists) and persist them there from now on.
    pub fn with_pull_request_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let loaded = load_pull_requests(&path)?;
            debug!(path = %path.display(), open = loaded.len(), "open pull requests loaded");
            self.write()?.open_prs = loaded;
        }
        self.pull_requests_path = Some(path);
        Ok(self)
    }

    pub fn add_repo(&self, repo: RepoRecord) -> Result<()> {
        let mut state = self.write()?;
        if state.repos.iter().any(|existing| existing.id == repo.id) {
            return Err(anyhow!("duplicate repo id '{}'", repo.id));
        }
        state.repos.push(repo);
        Ok(())
    }

    pub fn add_story(&self, story: Story) -> Result<()> {
        let mut state = self.write()?;
        if !state.repos.iter().any(|repo| repo.id == story.repo_id) {
            return Err(anyhow!(
                "story '{}' references unknown repo '{}'",
                story.id,
                story.repo_id
            ));
        }
        if state.stories.iter().any(|existing| existing.id == story.id) {
            return Err(anyhow!("duplicate story id '{}'", story.id));
        }
        state.stories.push(story);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CatalogState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("catalog lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, CatalogState>> {
        self.state
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn repo(&self, repo_id: &str) -> Result<Option<RepoRecord>> {
        Ok(self
            .read()?
            .repos
            .iter()
            .find(|repo| repo.id == repo_id)
            .cloned())
    }

    async fn repo_by_name(&self, full_name: &str) -> Result<Option<RepoRecord>> {
        Ok(self
            .read()?
            .repos
            .iter()
            .find(|repo| repo.full_name.eq_ignore_ascii_case(full_name))
            .cloned())
    }

    async fn stories(&self, repo_id: &str) -> Result<Vec<Story>> {
        Ok(self
            .read()?
            .stories
            .iter()
            .filter(|story| story.repo_id == repo_id)
            .cloned()
            .collect())
    }

    async fn open_pull_request(&self, repo_id: &str, branch: &str) -> Result<Option<u64>> {
        Ok(self
            .read()?
            .open_prs
            .get(&(repo_id.to_string(), branch.to_string()))
            .copied())
    }

    async fn record_pull_request(
        &self,
        repo_id: &str,
        pr: PullRequestRef,
        open: bool,
    ) -> Result<()> {
        let mut state = self.write()?;
        let mut open_prs = state.open_prs.clone();
        let key = (repo_id.to_string(), pr.branch);
        if open {
            open_prs.insert(key, pr.number);
        } else if open_prs.get(&key) == Some(&pr.number) {
            open_prs.remove(&key);
        }
        if open_prs == state.open_prs {
            return Ok(());
        }
        if let Some(path) = &self.pull_requests_path {
            write_pull_requests(path, &open_prs)?;
        }
        state.open_prs = open_prs;
        debug!(repo_id, number = pr.number, open, "pull request recorded");
        Ok(())
    }
}

fn load_pull_requests(path: &Path) -> Result<OpenPrs> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read open pull requests {}", path.display()))?;
    let entries: Vec<OpenPullRequest> = serde_json::from_str(&contents)
        .with_context(|| format!("parse open pull requests {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|pr| ((pr.repo_id, pr.branch), pr.number))
        .collect())
}

fn write_pull_requests(path: &Path, open_prs: &OpenPrs) -> Result<()> {
    let entries: Vec<OpenPullRequest> = open_prs
        .iter()
        .map(|((repo_id, branch), number)| OpenPullRequest {
            repo_id: repo_id.clone(),
            branch: branch.clone(),
            number: *number,
        })
        .collect();
    let mut buf = serde_json::to_string_pretty(&entries)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("pull request path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp pull requests {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace pull requests {}", path.display()))?;
    Ok(())
}

/// Load a JSON array of stories; entries without `repo_id` inherit `repo_id`.
pub fn load_stories(path: &Path, repo_id: &str) -> Result<Vec<Story>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read stories {}", path.display()))?;
    let mut values: Vec<serde_json::Value> = serde_json::from_str(&contents)
        .with_context(|| format!("parse stories {}", path.display()))?;
    let mut stories = Vec::with_capacity(values.len());
    for value in &mut values {
        if let Some(object) = value.as_object_mut() {
            object
                .entry("repo_id")
                .or_insert_with(|| serde_json::Value::String(repo_id.to_string()));
        }
        let story: Story = serde_json::from_value(value.take())
            .with_context(|| format!("deserialize story in {}", path.display()))?;
        if story.repo_id != repo_id {
            return Err(anyhow!(
                "story '{}' in {} belongs to repo '{}', expected '{}'",
                story.id,
                path.display(),
                story.repo_id,
                repo_id
            ));
        }
        stories.push(story);
    }
    debug!(path = %path.display(), count = stories.len(), "stories loaded");
    Ok(stories)
}
