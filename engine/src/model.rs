//! Persisted records: runs, story entries, stories and repositories.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{EvaluationAnalysis, Status};

/// Summary written on runs created with no stories.
pub const NO_STORIES_SUMMARY: &str = "No stories selected for evaluation";

/// Repository registered for story evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: String,
    /// `owner/name` as reported by the hosting VCS.
    pub full_name: String,
    /// Local clone used to provision sandboxes.
    pub checkout: PathBuf,
    pub enabled: bool,
}

impl RepoRecord {
    /// Split `full_name` into `(owner, name)`.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

/// A discovered unit of expected repository behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub repo_id: String,
    pub title: String,
    pub text: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One evaluation cycle of a repository's stories at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub repo_id: String,
    pub pr_number: Option<u64>,
    pub branch_name: String,
    pub commit_sha: String,
    pub commit_message: String,
    /// Strictly increasing per `repo_id`, starting at 1.
    pub number: u64,
    pub status: Status,
    pub summary: Option<String>,
    pub stories: Vec<StoryRunEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-story slot inside a [`Run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRunEntry {
    pub story_id: String,
    pub status: Status,
    pub result_id: Option<String>,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StoryRunEntry {
    pub fn running(story_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            story_id: story_id.into(),
            status: Status::Running,
            result_id: None,
            summary: None,
            started_at,
            completed_at: None,
        }
    }

    /// Apply a settled task outcome to this entry.
    pub fn settle(&mut self, settled: &Settled) {
        self.status = settled.status();
        self.completed_at = Some(settled.completed_at);
        match &settled.settlement {
            Settlement::Completed(verdict) => {
                self.result_id = Some(verdict.result_id.clone());
                self.summary = None;
            }
            Settlement::Failed { message } => {
                self.result_id = None;
                self.summary = Some(message.clone());
            }
        }
    }
}

/// What a finished story evaluation reports back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryVerdict {
    pub status: Status,
    pub result_id: String,
}

/// How one dispatched story task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed(StoryVerdict),
    /// The task returned an error or panicked; counts as a story `error`.
    Failed { message: String },
}

/// A story task outcome, tagged with its story and completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub story_id: String,
    pub settlement: Settlement,
    pub completed_at: DateTime<Utc>,
}

impl Settled {
    pub fn status(&self) -> Status {
        match &self.settlement {
            Settlement::Completed(verdict) => verdict.status,
            Settlement::Failed { .. } => Status::Error,
        }
    }
}

/// Persisted evaluation of one story within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryResult {
    pub id: String,
    pub run_id: String,
    pub story_id: String,
    pub analysis: EvaluationAnalysis,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(full_name: &str) -> RepoRecord {
        RepoRecord {
            id: "r1".to_string(),
            full_name: full_name.to_string(),
            checkout: PathBuf::from("/srv/r1"),
            enabled: true,
        }
    }

    #[test]
    fn owner_and_name_requires_one_slash() {
        assert_eq!(repo("acme/widgets").owner_and_name(), Some(("acme", "widgets")));
        assert_eq!(repo("acme").owner_and_name(), None);
        assert_eq!(repo("acme/widgets/extra").owner_and_name(), None);
        assert_eq!(repo("/widgets").owner_and_name(), None);
    }

    #[test]
    fn settle_failed_records_message_and_error() {
        let now = Utc::now();
        let mut entry = StoryRunEntry::running("s1", now);
        entry.settle(&Settled {
            story_id: "s1".to_string(),
            settlement: Settlement::Failed {
                message: "decomposition failed".to_string(),
            },
            completed_at: now,
        });
        assert_eq!(entry.status, Status::Error);
        assert_eq!(entry.summary.as_deref(), Some("decomposition failed"));
        assert_eq!(entry.result_id, None);
        assert_eq!(entry.completed_at, Some(now));
    }

    #[test]
    fn settle_completed_records_result() {
        let now = Utc::now();
        let mut entry = StoryRunEntry::running("s1", now);
        entry.settle(&Settled {
            story_id: "s1".to_string(),
            settlement: Settlement::Completed(StoryVerdict {
                status: Status::Fail,
                result_id: "res-1".to_string(),
            }),
            completed_at: now,
        });
        assert_eq!(entry.status, Status::Fail);
        assert_eq!(entry.result_id.as_deref(), Some("res-1"));
    }

    #[test]
    fn story_enabled_defaults_to_true() {
        let story: Story = serde_json::from_str(
            r#"{"id": "s1", "repo_id": "r1", "title": "Login", "text": "Users can log in"}"#,
        )
        .expect("parse");
        assert!(story.enabled);
    }
}
