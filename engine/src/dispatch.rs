//! Bounded fan-out of story evaluations over one shared sandbox.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
use tracing::{error, instrument, warn};

use crate::io::sandbox::SandboxHandle;
use crate::model::{Run, Settled, Settlement, Story, StoryVerdict};
use crate::observer::RunObserver;

/// The per-story task the dispatcher fans out.
#[async_trait]
pub trait StoryRunner: Send + Sync {
    async fn run_story(
        &self,
        run: &Run,
        story: &Story,
        sandbox: &SandboxHandle,
    ) -> Result<StoryVerdict>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// A bound of zero is raised to one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every story, at most `concurrency` at a time.
    ///
    /// Always returns one [`Settled`] per story, in input order. A task that
    /// errors or panics settles as `Failed` without affecting its siblings.
    #[instrument(skip_all, fields(run_id = %run.id, stories = stories.len(), concurrency = self.concurrency))]
    pub async fn dispatch(
        &self,
        runner: &dyn StoryRunner,
        run: &Run,
        stories: &[Story],
        sandbox: &SandboxHandle,
        observer: &dyn RunObserver,
    ) -> Vec<Settled> {
        let mut settled: Vec<(usize, Settled)> = stream::iter(0..stories.len())
            .map(move |index| {
                let story = &stories[index];
                async move {
                    let outcome = AssertUnwindSafe(runner.run_story(run, story, sandbox))
                        .catch_unwind()
                        .await;
                    let settlement = match outcome {
                        Ok(Ok(verdict)) => Settlement::Completed(verdict),
                        Ok(Err(err)) => {
                            let message = format!("{err:#}");
                            warn!(story_id = %story.id, err = %message, "story task failed");
                            Settlement::Failed { message }
                        }
                        Err(payload) => {
                            let message =
                                format!("story task panicked: {}", panic_message(&*payload));
                            error!(story_id = %story.id, "{message}");
                            Settlement::Failed { message }
                        }
                    };
                    let settled = Settled {
                        story_id: story.id.clone(),
                        settlement,
                        completed_at: Utc::now(),
                    };
                    observer.on_story_complete(&run.id, &settled);
                    (index, settled)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        settled.sort_by_key(|(index, _)| *index);
        settled.into_iter().map(|(_, settled)| settled).collect()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Status;
    use crate::observer::NoopObserver;
    use crate::test_support::{
        FailingStoryRunner, RecordingObserver, sample_run, sample_sandbox, sample_stories,
    };

    #[tokio::test]
    async fn failing_story_does_not_affect_siblings() {
        let stories = sample_stories("r1", 5);
        let run = sample_run("r1", 1, &["s1", "s2", "s3", "s4", "s5"]);
        let runner = FailingStoryRunner::erroring(&["s3"]);

        let settled = Dispatcher::new(2)
            .dispatch(
                &runner,
                &run,
                &stories,
                &sample_sandbox("r1"),
                &NoopObserver,
            )
            .await;

        assert_eq!(settled.len(), 5);
        let ids: Vec<&str> = settled.iter().map(|s| s.story_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4", "s5"]);
        for (index, entry) in settled.iter().enumerate() {
            if index == 2 {
                assert_eq!(entry.status(), Status::Error);
                assert!(
                    matches!(&entry.settlement, Settlement::Failed { message } if message.contains("s3 exploded"))
                );
            } else {
                assert_eq!(entry.status(), Status::Pass);
            }
        }
    }

    #[tokio::test]
    async fn panicking_story_settles_as_error() {
        let stories = sample_stories("r1", 3);
        let run = sample_run("r1", 1, &["s1", "s2", "s3"]);
        let runner = FailingStoryRunner::panicking(&["s2"]);
        let observer = RecordingObserver::default();

        let settled = Dispatcher::new(3)
            .dispatch(&runner, &run, &stories, &sample_sandbox("r1"), &observer)
            .await;

        assert_eq!(settled[1].status(), Status::Error);
        assert!(
            matches!(&settled[1].settlement, Settlement::Failed { message } if message.contains("story task panicked: s2 panicked"))
        );
        assert_eq!(settled[0].status(), Status::Pass);
        assert_eq!(settled[2].status(), Status::Pass);
        assert_eq!(
            observer
                .calls()
                .iter()
                .filter(|call| call.starts_with("story_complete"))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn stories_overlap_up_to_the_bound() {
        let stories = sample_stories("r1", 6);
        let ids: Vec<String> = stories.iter().map(|s| s.id.clone()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let run = sample_run("r1", 1, &id_refs);
        let runner = FailingStoryRunner::erroring(&[]);

        let settled = Dispatcher::new(2)
            .dispatch(
                &runner,
                &run,
                &stories,
                &sample_sandbox("r1"),
                &NoopObserver,
            )
            .await;

        assert_eq!(settled.len(), 6);
        assert_eq!(runner.max_in_flight(), 2);
        assert_eq!(runner.calls(), 6);
    }

    #[test]
    fn zero_concurrency_becomes_one() {
        assert_eq!(Dispatcher::new(0).concurrency(), 1);
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
