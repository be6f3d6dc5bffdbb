//! Deterministic explanation built from the step records.

use async_trait::async_trait;

use super::Summarizer;
use crate::core::types::{Status, StepConclusion, StepRecord};
use crate::model::Story;

#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSummarizer;

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, story: &Story, status: Status, steps: &[StepRecord]) -> String {
        digest(story, status, steps)
    }
}

fn digest(story: &Story, status: Status, steps: &[StepRecord]) -> String {
    if steps.is_empty() {
        return format!("{}: {status} (no steps to evaluate)", story.title);
    }
    let passed = steps
        .iter()
        .filter(|step| step.conclusion == StepConclusion::Pass)
        .count();
    let mut text = format!(
        "{}: {status} ({passed} of {} steps passed)",
        story.title,
        steps.len()
    );
    if let Some((index, step)) = steps
        .iter()
        .enumerate()
        .find(|(_, step)| step.conclusion != StepConclusion::Pass)
    {
        text.push_str(&format!(
            "; first {} at step {}: {}",
            match step.conclusion {
                StepConclusion::Error => "error",
                StepConclusion::Fail | StepConclusion::Pass => "failure",
            },
            index + 1,
            step.outcome
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepKind;
    use crate::test_support::sample_story;

    fn record(conclusion: StepConclusion, outcome: &str) -> StepRecord {
        StepRecord {
            kind: StepKind::Requirement,
            conclusion,
            outcome: outcome.to_string(),
            assertions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn names_first_non_passing_step() {
        let story = sample_story("r1", "s1");
        let steps = vec![
            record(StepConclusion::Pass, "ok"),
            record(StepConclusion::Error, "evaluation failed: timeout"),
            record(StepConclusion::Fail, "missing button"),
        ];
        let text = DigestSummarizer
            .summarize(&story, Status::Error, &steps)
            .await;
        assert_eq!(
            text,
            format!(
                "{}: error (1 of 3 steps passed); first error at step 2: evaluation failed: timeout",
                story.title
            )
        );
    }

    #[tokio::test]
    async fn empty_steps() {
        let story = sample_story("r1", "s1");
        let text = DigestSummarizer.summarize(&story, Status::Pass, &[]).await;
        assert!(text.ends_with("pass (no steps to evaluate)"));
    }
}
