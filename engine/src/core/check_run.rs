//! Check-run payload construction.
//!
//! Builds the content submitted to the status-check API. No I/O happens here;
//! the reporter decides whether to create or update.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::aggregate::summary_text;
use crate::core::types::{Counts, Status};
use crate::model::{Run, StoryRunEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    pub text: String,
}

/// Payload for one create/update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunContent {
    pub status: CheckRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<CheckConclusion>,
    pub output: CheckRunOutput,
}

/// Identifier assigned by the remote check-run API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckRunId(pub u64);

impl fmt::Display for CheckRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a run verdict to a check conclusion.
pub fn conclusion_for(status: Status) -> CheckConclusion {
    match status {
        Status::Pass => CheckConclusion::Success,
        Status::Fail | Status::Error => CheckConclusion::Failure,
        Status::Skipped | Status::Running => CheckConclusion::Neutral,
    }
}

pub fn started_content(run: &Run, story_count: usize) -> CheckRunContent {
    let plural = if story_count == 1 { "story" } else { "stories" };
    CheckRunContent {
        status: CheckRunStatus::InProgress,
        conclusion: None,
        output: CheckRunOutput {
            title: format!("Evaluating {story_count} {plural}"),
            summary: run_heading(run),
            text: story_lines(&run.stories),
        },
    }
}

pub fn completed_content(
    run: &Run,
    final_status: Status,
    counts: &Counts,
    entries: &[StoryRunEntry],
) -> CheckRunContent {
    CheckRunContent {
        status: CheckRunStatus::Completed,
        conclusion: Some(conclusion_for(final_status)),
        output: CheckRunOutput {
            title: summary_text(counts),
            summary: format!("{} finished: {}", run_heading(run), final_status),
            text: story_lines(entries),
        },
    }
}

fn run_heading(run: &Run) -> String {
    let short_sha: String = run.commit_sha.chars().take(7).collect();
    format!("Run #{} on {} @ {}", run.number, run.branch_name, short_sha)
}

fn story_lines(entries: &[StoryRunEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        text.push_str(&format!("- `{}`: {}", entry.story_id, entry.status));
        if let Some(summary) = &entry.summary {
            text.push_str(&format!(" ({summary})"));
        }
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_run;

    #[test]
    fn conclusion_mapping() {
        assert_eq!(conclusion_for(Status::Pass), CheckConclusion::Success);
        assert_eq!(conclusion_for(Status::Fail), CheckConclusion::Failure);
        assert_eq!(conclusion_for(Status::Error), CheckConclusion::Failure);
        assert_eq!(conclusion_for(Status::Skipped), CheckConclusion::Neutral);
    }

    #[test]
    fn started_content_is_in_progress_without_conclusion() {
        let run = sample_run("r1", 3, &["s1", "s2"]);
        let content = started_content(&run, 2);
        assert_eq!(content.status, CheckRunStatus::InProgress);
        assert_eq!(content.conclusion, None);
        assert_eq!(content.output.title, "Evaluating 2 stories");
        assert!(content.output.summary.starts_with("Run #3 on main @ "));
        assert!(content.output.text.contains("`s1`: running"));
    }

    #[test]
    fn completed_content_uses_summary_text_as_title() {
        let run = sample_run("r1", 1, &["s1"]);
        let counts = Counts {
            pass: 1,
            fail: 0,
            error: 0,
        };
        let content = completed_content(&run, Status::Pass, &counts, &run.stories);
        assert_eq!(content.status, CheckRunStatus::Completed);
        assert_eq!(content.conclusion, Some(CheckConclusion::Success));
        assert_eq!(content.output.title, "1 passed, 0 failed, 0 errors");
    }

    #[test]
    fn payload_omits_missing_conclusion() {
        let run = sample_run("r1", 1, &["s1"]);
        let value = serde_json::to_value(started_content(&run, 1)).expect("serialize");
        assert_eq!(value["status"], "in_progress");
        assert!(value.get("conclusion").is_none());
    }
}
