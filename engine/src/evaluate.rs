//! Story evaluation: decompose, verify each step in order, combine, persist.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::agents::{AgentSet, StepRequest, Verifier};
use crate::core::combine::combine_step_statuses;
use crate::core::types::{
    ANALYSIS_VERSION, DecompositionStep, EvaluationAnalysis, Status, StepConclusion,
    StepEvaluationResult, StepRecord,
};
use crate::dispatch::StoryRunner;
use crate::io::run_store::RunStore;
use crate::io::sandbox::SandboxHandle;
use crate::model::{Run, Story, StoryResult, StoryVerdict};
use crate::observer::RunObserver;

/// Identifies the story being evaluated for progress callbacks.
#[derive(Clone, Copy)]
pub struct StoryScope<'a> {
    pub run_id: &'a str,
    pub story_id: &'a str,
    pub observer: &'a dyn RunObserver,
}

/// Evaluate `steps` strictly in order.
///
/// Every step is evaluated even after a failure. A verifier error becomes an
/// `error` step with outcome `evaluation failed: <reason>`.
pub async fn evaluate_steps(
    steps: &[DecompositionStep],
    verifier: &dyn Verifier,
    workdir: &Path,
    scope: StoryScope<'_>,
) -> Vec<StepRecord> {
    let mut records: Vec<StepRecord> = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let kind = step.kind();
        scope
            .observer
            .on_step_start(scope.run_id, scope.story_id, index, kind);

        let result = match step {
            DecompositionStep::Given { statement } => StepEvaluationResult {
                conclusion: StepConclusion::Pass,
                outcome: statement.clone(),
                assertions: Vec::new(),
            },
            DecompositionStep::Requirement {
                outcome,
                assertions,
            } => {
                let request = StepRequest {
                    goal: outcome.clone(),
                    assertions: assertions.clone(),
                    given_facts: established_facts(&records),
                    workdir: workdir.to_path_buf(),
                };
                match verifier.verify(&request).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(
                            story_id = scope.story_id,
                            step = index,
                            err = %format!("{err:#}"),
                            "step evaluation failed"
                        );
                        StepEvaluationResult {
                            conclusion: StepConclusion::Error,
                            outcome: format!("evaluation failed: {err:#}"),
                            assertions: Vec::new(),
                        }
                    }
                }
            }
        };

        debug!(story_id = scope.story_id, step = index, conclusion = ?result.conclusion, "step evaluated");
        scope
            .observer
            .on_step_complete(scope.run_id, scope.story_id, index, result.conclusion);
        records.push(StepRecord::new(kind, result));
    }
    records
}

/// Facts from every earlier step, whatever its conclusion.
fn established_facts(records: &[StepRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.assertions.iter().map(|assertion| assertion.fact.clone()))
        .collect()
}

/// Story status for a list of evaluated steps.
pub fn story_status(records: &[StepRecord]) -> Status {
    combine_step_statuses(records.iter().map(|record| Status::from(record.conclusion)))
}

/// [`StoryRunner`] backed by the configured agents and run store.
pub struct StoryEvaluator {
    agents: AgentSet,
    store: Arc<dyn RunStore>,
    observer: Arc<dyn RunObserver>,
}

impl StoryEvaluator {
    pub fn new(agents: AgentSet, store: Arc<dyn RunStore>, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            agents,
            store,
            observer,
        }
    }
}

#[async_trait]
impl StoryRunner for StoryEvaluator {
    #[instrument(skip_all, fields(run_id = %run.id, story_id = %story.id))]
    async fn run_story(
        &self,
        run: &Run,
        story: &Story,
        sandbox: &SandboxHandle,
    ) -> Result<StoryVerdict> {
        let steps = self
            .agents
            .decomposer
            .decompose(story, &sandbox.workdir)
            .await
            .context("decomposition failed")?;

        let scope = StoryScope {
            run_id: &run.id,
            story_id: &story.id,
            observer: self.observer.as_ref(),
        };
        let records =
            evaluate_steps(&steps, self.agents.verifier.as_ref(), &sandbox.workdir, scope).await;
        let status = story_status(&records);
        let explanation = self
            .agents
            .summarizer
            .summarize(story, status, &records)
            .await;

        let result = StoryResult {
            id: Uuid::new_v4().to_string(),
            run_id: run.id.clone(),
            story_id: story.id.clone(),
            analysis: EvaluationAnalysis {
                version: ANALYSIS_VERSION,
                status,
                explanation,
                steps: records,
            },
            created_at: Utc::now(),
        };
        let result_id = self
            .store
            .insert_result(result)
            .await
            .context("persist story result")?;
        debug!(%status, result_id = %result_id, "story evaluated");
        Ok(StoryVerdict { status, result_id })
    }
}
