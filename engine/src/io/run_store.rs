//! Run persistence.
//!
//! [`RunStore`] is the seam the controller and story evaluator write through.
//! Both implementations share [`Ledger`], which holds the bookkeeping rules;
//! [`FileRunStore`] additionally persists the ledger as JSON after every write.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::types::Status;
use crate::model::{Run, StoryResult, StoryRunEntry};

/// Fields replaced by a terminal run write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunUpdate {
    pub status: Status,
    pub summary: String,
    /// `None` leaves the story entries untouched.
    pub stories: Option<Vec<StoryRunEntry>>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// `max(existing numbers for repo) + 1`, or 1 for a repo without runs.
    async fn next_run_number(&self, repo_id: &str) -> Result<u64>;
    async fn insert_run(&self, run: Run) -> Result<()>;
    /// Insert `run` under the next number for its repository, assigned in the
    /// same critical section as the insert. Returns the run as stored.
    async fn insert_numbered(&self, run: Run) -> Result<Run>;
    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<()>;
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;
    /// The `running` run for a pull request, if any.
    async fn find_running_run(&self, repo_id: &str, pr_number: u64) -> Result<Option<Run>>;
    /// Runs for a repository, newest number first.
    async fn list_runs(&self, repo_id: &str) -> Result<Vec<Run>>;
    /// Persist a story result and return its id.
    async fn insert_result(&self, result: StoryResult) -> Result<String>;
    async fn get_result(&self, result_id: &str) -> Result<Option<StoryResult>>;
}

/// In-memory bookkeeping shared by the store implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub runs: Vec<Run>,
    pub results: Vec<StoryResult>,
}

impl Ledger {
    pub fn next_run_number(&self, repo_id: &str) -> u64 {
        self.runs
            .iter()
            .filter(|run| run.repo_id == repo_id)
            .map(|run| run.number)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn insert_run(&mut self, run: Run) -> Result<()> {
        if self.runs.iter().any(|existing| existing.id == run.id) {
            return Err(anyhow!("run '{}' already exists", run.id));
        }
        if self
            .runs
            .iter()
            .any(|existing| existing.repo_id == run.repo_id && existing.number == run.number)
        {
            return Err(anyhow!(
                "run number {} already used for repo '{}'",
                run.number,
                run.repo_id
            ));
        }
        self.runs.push(run);
        Ok(())
    }

    pub fn insert_numbered(&mut self, mut run: Run) -> Result<Run> {
        run.number = self.next_run_number(&run.repo_id);
        self.insert_run(run.clone())?;
        Ok(run)
    }

    pub fn update_run(&mut self, run_id: &str, update: RunUpdate) -> Result<()> {
        let run = self
            .runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or_else(|| anyhow!("run '{run_id}' not found"))?;
        run.status = update.status;
        run.summary = Some(update.summary);
        if let Some(stories) = update.stories {
            run.stories = stories;
        }
        run.updated_at = update.updated_at;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Option<Run> {
        self.runs.iter().find(|run| run.id == run_id).cloned()
    }

    pub fn find_running_run(&self, repo_id: &str, pr_number: u64) -> Option<Run> {
        self.runs
            .iter()
            .find(|run| {
                run.repo_id == repo_id
                    && run.pr_number == Some(pr_number)
                    && run.status == Status::Running
            })
            .cloned()
    }

    pub fn list_runs(&self, repo_id: &str) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|run| run.repo_id == repo_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.number.cmp(&a.number));
        runs
    }

    pub fn insert_result(&mut self, result: StoryResult) -> Result<String> {
        if self.results.iter().any(|existing| existing.id == result.id) {
            return Err(anyhow!("result '{}' already exists", result.id));
        }
        let id = result.id.clone();
        self.results.push(result);
        Ok(id)
    }

    pub fn get_result(&self, result_id: &str) -> Option<StoryResult> {
        self.results
            .iter()
            .find(|result| result.id == result_id)
            .cloned()
    }
}

/// Process-local store; state is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    ledger: Mutex<Ledger>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current ledger, for inspection.
    pub async fn snapshot(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn next_run_number(&self, repo_id: &str) -> Result<u64> {
        Ok(self.ledger.lock().await.next_run_number(repo_id))
    }

    async fn insert_run(&self, run: Run) -> Result<()> {
        self.ledger.lock().await.insert_run(run)
    }

    async fn insert_numbered(&self, run: Run) -> Result<Run> {
        self.ledger.lock().await.insert_numbered(run)
    }

    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        self.ledger.lock().await.update_run(run_id, update)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.ledger.lock().await.get_run(run_id))
    }

    async fn find_running_run(&self, repo_id: &str, pr_number: u64) -> Result<Option<Run>> {
        Ok(self.ledger.lock().await.find_running_run(repo_id, pr_number))
    }

    async fn list_runs(&self, repo_id: &str) -> Result<Vec<Run>> {
        Ok(self.ledger.lock().await.list_runs(repo_id))
    }

    async fn insert_result(&self, result: StoryResult) -> Result<String> {
        self.ledger.lock().await.insert_result(result)
    }

    async fn get_result(&self, result_id: &str) -> Result<Option<StoryResult>> {
        Ok(self.ledger.lock().await.get_result(result_id))
    }
}

/// JSON-file store (`<state_dir>/runs.json`), rewritten atomically after each write.
#[derive(Debug)]
pub struct FileRunStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl FileRunStore {
    /// Open the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = if path.exists() {
            load_ledger(&path)?
        } else {
            Ledger::default()
        };
        debug!(path = %path.display(), runs = ledger.runs.len(), "run ledger opened");
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a mutation and persist; the in-memory ledger only changes if the write lands.
    async fn mutate<T>(&self, apply: impl FnOnce(&mut Ledger) -> Result<T>) -> Result<T> {
        let mut guard = self.ledger.lock().await;
        let mut next = guard.clone();
        let value = apply(&mut next)?;
        write_ledger(&self.path, &next).await?;
        *guard = next;
        Ok(value)
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn next_run_number(&self, repo_id: &str) -> Result<u64> {
        Ok(self.ledger.lock().await.next_run_number(repo_id))
    }

    async fn insert_run(&self, run: Run) -> Result<()> {
        self.mutate(|ledger| ledger.insert_run(run)).await
    }

    async fn insert_numbered(&self, run: Run) -> Result<Run> {
        self.mutate(|ledger| ledger.insert_numbered(run)).await
    }

    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        self.mutate(|ledger| ledger.update_run(run_id, update)).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.ledger.lock().await.get_run(run_id))
    }

    async fn find_running_run(&self, repo_id: &str, pr_number: u64) -> Result<Option<Run>> {
        Ok(self.ledger.lock().await.find_running_run(repo_id, pr_number))
    }

    async fn list_runs(&self, repo_id: &str) -> Result<Vec<Run>> {
        Ok(self.ledger.lock().await.list_runs(repo_id))
    }

    async fn insert_result(&self, result: StoryResult) -> Result<String> {
        self.mutate(|ledger| ledger.insert_result(result)).await
    }

    async fn get_result(&self, result_id: &str) -> Result<Option<StoryResult>> {
        Ok(self.ledger.lock().await.get_result(result_id))
    }
}

fn load_ledger(path: &Path) -> Result<Ledger> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run ledger {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse run ledger {}", path.display()))
}

async fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    debug!(path = %path.display(), runs = ledger.runs.len(), "writing run ledger");
    let mut buf = serde_json::to_string_pretty(ledger)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("run ledger path missing parent {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, buf)
        .await
        .with_context(|| format!("write temp run ledger {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("replace run ledger {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_result, sample_run};

    #[tokio::test]
    async fn numbering_starts_at_one_and_is_per_repo() {
        let store = MemoryRunStore::new();
        assert_eq!(store.next_run_number("r1").await.expect("next"), 1);

        store.insert_run(sample_run("r1", 1, &[])).await.expect("insert");
        store.insert_run(sample_run("r1", 7, &[])).await.expect("insert");
        store.insert_run(sample_run("r2", 3, &[])).await.expect("insert");

        assert_eq!(store.next_run_number("r1").await.expect("next"), 8);
        assert_eq!(store.next_run_number("r2").await.expect("next"), 4);
    }

    #[tokio::test]
    async fn duplicate_number_is_rejected() {
        let store = MemoryRunStore::new();
        store.insert_run(sample_run("r1", 1, &[])).await.expect("insert");
        let err = store
            .insert_run(sample_run("r1", 1, &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[tokio::test]
    async fn insert_numbered_overrides_caller_number() {
        let store = MemoryRunStore::new();
        store.insert_run(sample_run("r1", 4, &[])).await.expect("insert");
        let stored = store
            .insert_numbered(sample_run("r1", 1, &[]))
            .await
            .expect("insert numbered");
        assert_eq!(stored.number, 5);
        let first_r2 = store
            .insert_numbered(sample_run("r2", 9, &[]))
            .await
            .expect("insert numbered");
        assert_eq!(first_r2.number, 1);
    }

    #[tokio::test]
    async fn find_running_run_matches_repo_pr_and_status() {
        let store = MemoryRunStore::new();
        let mut run = sample_run("r1", 1, &["s1"]);
        run.pr_number = Some(42);
        let run_id = run.id.clone();
        store.insert_run(run).await.expect("insert");

        assert!(store.find_running_run("r1", 42).await.expect("find").is_some());
        assert!(store.find_running_run("r1", 43).await.expect("find").is_none());
        assert!(store.find_running_run("r2", 42).await.expect("find").is_none());

        store
            .update_run(
                &run_id,
                RunUpdate {
                    status: Status::Pass,
                    summary: "1 passed, 0 failed, 0 errors".to_string(),
                    stories: None,
                    updated_at: Utc::now(),
                },
            )
            .await
            .expect("update");
        assert!(store.find_running_run("r1", 42).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn list_runs_is_newest_first() {
        let store = MemoryRunStore::new();
        for number in [1, 3, 2] {
            store
                .insert_run(sample_run("r1", number, &[]))
                .await
                .expect("insert");
        }
        let numbers: Vec<u64> = store
            .list_runs("r1")
            .await
            .expect("list")
            .iter()
            .map(|run| run.number)
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn update_unknown_run_errors() {
        let store = MemoryRunStore::new();
        let err = store
            .update_run(
                "missing",
                RunUpdate {
                    status: Status::Error,
                    summary: "boom".to_string(),
                    stories: None,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    /// Verifies a reopened file store sees runs and results written earlier.
    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("runs.json");

        let store = FileRunStore::open(&path).expect("open");
        let run = sample_run("r1", 1, &["s1"]);
        let run_id = run.id.clone();
        store.insert_run(run).await.expect("insert");
        let result_id = store
            .insert_result(sample_result(&run_id, "s1"))
            .await
            .expect("insert result");
        drop(store);

        let reopened = FileRunStore::open(&path).expect("reopen");
        assert_eq!(reopened.next_run_number("r1").await.expect("next"), 2);
        let result = reopened
            .get_result(&result_id)
            .await
            .expect("get")
            .expect("result exists");
        assert_eq!(result.story_id, "s1");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_keeps_memory_unchanged_on_rejected_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileRunStore::open(temp.path().join("runs.json")).expect("open");
        store.insert_run(sample_run("r1", 1, &[])).await.expect("insert");
        assert!(store.insert_run(sample_run("r1", 1, &[])).await.is_err());
        assert_eq!(store.list_runs("r1").await.expect("list").len(), 1);
    }
}
