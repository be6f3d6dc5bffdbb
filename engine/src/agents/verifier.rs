//! Verifier agent: checks one requirement step inside the sandbox.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{AgentLimits, StepRequest, Verifier};
use crate::core::types::StepEvaluationResult;
use crate::io::executor::{ExecRequest, Executor, execute_and_load_json};

const STEP_EVALUATION_SCHEMA: &str = include_str!("../../schemas/step_evaluation.schema.json");

/// Executor-backed verifier.
#[derive(Clone)]
pub struct VerifierAgent {
    executor: Arc<dyn Executor>,
    limits: AgentLimits,
}

impl VerifierAgent {
    pub fn new(executor: Arc<dyn Executor>, limits: AgentLimits) -> Self {
        Self { executor, limits }
    }

    fn request(&self, step: &StepRequest) -> Result<ExecRequest> {
        let mut prompt = String::new();
        prompt.push_str(
            "Verify whether the repository in the current directory satisfies the goal below. \
             Inspect code and run read-only commands as needed; do not modify files. \
             Conclude `pass` only when every assertion holds, `fail` when any does not, \
             and `error` when verification was impossible.\n\n",
        );
        prompt.push_str(&format!("## Goal\n{}\n", step.goal));
        if !step.assertions.is_empty() {
            prompt.push_str("\n## Assertions\n");
            for assertion in &step.assertions {
                prompt.push_str(&format!("- {assertion}\n"));
            }
        }
        if !step.given_facts.is_empty() {
            prompt.push_str("\n## Established facts\n");
            for fact in &step.given_facts {
                prompt.push_str(&format!("- {fact}\n"));
            }
        }
        Ok(ExecRequest {
            label: "verifier",
            workdir: step.workdir.clone(),
            prompt,
            payload: serde_json::to_value(step)?,
            output_schema: STEP_EVALUATION_SCHEMA,
            timeout: self.limits.timeout,
            output_limit_bytes: self.limits.output_limit_bytes,
        })
    }
}

#[async_trait]
impl Verifier for VerifierAgent {
    #[instrument(skip_all, fields(assertions = request.assertions.len()))]
    async fn verify(&self, request: &StepRequest) -> Result<StepEvaluationResult> {
        let exec = self.request(request)?;
        let result: StepEvaluationResult =
            execute_and_load_json(self.executor.as_ref(), &exec).await?;
        debug!(conclusion = ?result.conclusion, "step verified");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepConclusion;
    use crate::test_support::{ScriptedExecutor, test_limits};
    use std::path::PathBuf;

    fn step() -> StepRequest {
        StepRequest {
            goal: "logout clears the session".to_string(),
            assertions: vec!["session cookie removed".to_string()],
            given_facts: vec!["user is signed in".to_string()],
            workdir: PathBuf::from("/tmp/sandbox"),
        }
    }

    #[tokio::test]
    async fn verifier_sends_facts_and_parses_result() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(r#"{
            "conclusion": "fail",
            "outcome": "cookie survives logout",
            "assertions": [{"fact": "cookie still present", "evidence": ["src/session.rs:42"]}]
        }"#
        .to_string())]));
        let agent = VerifierAgent::new(executor.clone(), test_limits());

        let result = agent.verify(&step()).await.expect("verify");
        assert_eq!(result.conclusion, StepConclusion::Fail);
        assert_eq!(result.assertions[0].evidence, vec!["src/session.rs:42"]);

        let requests = executor.requests();
        assert_eq!(requests[0].payload["given_facts"][0], "user is signed in");
        assert!(requests[0].prompt.contains("- session cookie removed"));
    }

    #[tokio::test]
    async fn verifier_surfaces_executor_failure() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err("codex exec timed out".to_string())]));
        let agent = VerifierAgent::new(executor, test_limits());
        let err = agent.verify(&step()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
