//! Decomposer agent: turns a story into ordered given/requirement steps.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{AgentLimits, Decomposer};
use crate::core::types::DecompositionStep;
use crate::io::executor::{ExecRequest, Executor, execute_and_load_json};
use crate::model::Story;

const DECOMPOSITION_SCHEMA: &str = include_str!("../../schemas/decomposition.schema.json");

#[derive(Debug, Deserialize)]
struct DecompositionOutput {
    steps: Vec<DecompositionStep>,
}

/// Executor-backed decomposer.
#[derive(Clone)]
pub struct DecomposerAgent {
    executor: Arc<dyn Executor>,
    limits: AgentLimits,
}

impl DecomposerAgent {
    pub fn new(executor: Arc<dyn Executor>, limits: AgentLimits) -> Self {
        Self { executor, limits }
    }

    fn request(&self, story: &Story, workdir: &Path) -> ExecRequest {
        let prompt = format!(
            "Decompose the user story below into ordered steps for verifying it against the \
             repository in the current directory. Use `given` steps for preconditions and \
             `requirement` steps for observable outcomes, each with concrete assertions. \
             Do not modify any files.\n\n# {}\n\n{}\n",
            story.title, story.text
        );
        ExecRequest {
            label: "decomposer",
            workdir: workdir.to_path_buf(),
            prompt,
            payload: serde_json::json!({
                "story": {
                    "id": story.id,
                    "title": story.title,
                    "text": story.text,
                },
            }),
            output_schema: DECOMPOSITION_SCHEMA,
            timeout: self.limits.timeout,
            output_limit_bytes: self.limits.output_limit_bytes,
        }
    }
}

#[async_trait]
impl Decomposer for DecomposerAgent {
    #[instrument(skip_all, fields(story_id = %story.id))]
    async fn decompose(&self, story: &Story, workdir: &Path) -> Result<Vec<DecompositionStep>> {
        let request = self.request(story, workdir);
        let output: DecompositionOutput =
            execute_and_load_json(self.executor.as_ref(), &request).await?;
        debug!(steps = output.steps.len(), "story decomposed");
        Ok(output.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedExecutor, sample_story, test_limits};

    #[tokio::test]
    async fn decomposer_parses_steps_and_sends_story() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(r#"{"steps": [
            {"type": "given", "statement": "a registered user"},
            {"type": "requirement", "outcome": "login succeeds", "assertions": ["session cookie set"]}
        ]}"#
            .to_string())]));
        let agent = DecomposerAgent::new(executor.clone(), test_limits());

        let steps = agent
            .decompose(&sample_story("r1", "s1"), Path::new("/tmp/sandbox"))
            .await
            .expect("decompose");

        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], DecompositionStep::Given { .. }));
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].label, "decomposer");
        assert_eq!(requests[0].payload["story"]["id"], "s1");
        assert_eq!(requests[0].workdir, Path::new("/tmp/sandbox"));
    }

    #[tokio::test]
    async fn decomposer_rejects_unknown_step_type() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(
            r#"{"steps": [{"type": "when", "statement": "x"}]}"#.to_string(),
        )]));
        let agent = DecomposerAgent::new(executor, test_limits());
        let err = agent
            .decompose(&sample_story("r1", "s1"), Path::new("."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("schema validation failed"), "{err}");
    }
}
