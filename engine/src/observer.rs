//! Progress reporting for runs in flight.
//!
//! The evaluator and orchestrator call a [`RunObserver`] at fixed points.
//! [`BroadcastObserver`] turns those calls into [`RunEvent`]s on a tokio
//! broadcast channel, which the HTTP server streams to SSE clients.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::types::{StepConclusion, StepKind, Status};
use crate::model::{Run, Settled};

/// Serializable progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        repo_id: String,
        number: u64,
        story_count: usize,
    },
    StepStarted {
        run_id: String,
        story_id: String,
        index: usize,
        kind: StepKind,
    },
    StepCompleted {
        run_id: String,
        story_id: String,
        index: usize,
        conclusion: StepConclusion,
    },
    StoryCompleted {
        run_id: String,
        story_id: String,
        status: Status,
    },
    RunCompleted {
        run_id: String,
        status: Status,
        summary: String,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::StoryCompleted { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. } => run_id,
        }
    }
}

/// Observer hooks. Implementations must not block.
pub trait RunObserver: Send + Sync {
    fn on_run_start(&self, _run: &Run) {}
    fn on_step_start(&self, _run_id: &str, _story_id: &str, _index: usize, _kind: StepKind) {}
    fn on_step_complete(
        &self,
        _run_id: &str,
        _story_id: &str,
        _index: usize,
        _conclusion: StepConclusion,
    ) {
    }
    fn on_story_complete(&self, _run_id: &str, _settled: &Settled) {}
    fn on_run_complete(&self, _run_id: &str, _status: Status, _summary: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Publishes every hook as a [`RunEvent`]. Sends without receivers are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<RunEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<RunEvent> {
        self.tx.clone()
    }

    fn publish(&self, event: RunEvent) {
        if self.tx.send(event).is_err() {
            trace!("no run event subscribers");
        }
    }
}

impl RunObserver for BroadcastObserver {
    fn on_run_start(&self, run: &Run) {
        self.publish(RunEvent::RunStarted {
            run_id: run.id.clone(),
            repo_id: run.repo_id.clone(),
            number: run.number,
            story_count: run.stories.len(),
        });
    }

    fn on_step_start(&self, run_id: &str, story_id: &str, index: usize, kind: StepKind) {
        self.publish(RunEvent::StepStarted {
            run_id: run_id.to_string(),
            story_id: story_id.to_string(),
            index,
            kind,
        });
    }

    fn on_step_complete(
        &self,
        run_id: &str,
        story_id: &str,
        index: usize,
        conclusion: StepConclusion,
    ) {
        self.publish(RunEvent::StepCompleted {
            run_id: run_id.to_string(),
            story_id: story_id.to_string(),
            index,
            conclusion,
        });
    }

    fn on_story_complete(&self, run_id: &str, settled: &Settled) {
        self.publish(RunEvent::StoryCompleted {
            run_id: run_id.to_string(),
            story_id: settled.story_id.clone(),
            status: settled.status(),
        });
    }

    fn on_run_complete(&self, run_id: &str, status: Status, summary: &str) {
        self.publish(RunEvent::RunCompleted {
            run_id: run_id.to_string(),
            status,
            summary: summary.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_run;

    #[test]
    fn broadcast_observer_publishes_events() {
        let observer = BroadcastObserver::new(8);
        let mut rx = observer.subscribe();
        let run = sample_run("r1", 2, &["s1", "s2"]);

        observer.on_run_start(&run);
        observer.on_step_complete(&run.id, "s1", 0, StepConclusion::Pass);
        observer.on_run_complete(&run.id, Status::Pass, "2 passed, 0 failed, 0 errors");

        let first = rx.try_recv().expect("run started");
        assert_eq!(
            first,
            RunEvent::RunStarted {
                run_id: run.id.clone(),
                repo_id: "r1".to_string(),
                number: 2,
                story_count: 2,
            }
        );
        let second = rx.try_recv().expect("step completed");
        assert_eq!(second.run_id(), run.id);
        let third = rx.try_recv().expect("run completed");
        assert!(matches!(third, RunEvent::RunCompleted { status: Status::Pass, .. }));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let observer = BroadcastObserver::new(1);
        observer.on_run_complete("run-1", Status::Error, "boom");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(RunEvent::StepStarted {
            run_id: "run-1".to_string(),
            story_id: "s1".to_string(),
            index: 0,
            kind: StepKind::Requirement,
        })
        .expect("serialize");
        assert_eq!(value["type"], "step_started");
        assert_eq!(value["kind"], "requirement");
    }
}
