//! Agent abstractions for story decomposition and step verification.
//!
//! The evaluator only sees the traits below. [`AgentSet::from_config`] is the
//! single place a configured provider turns into concrete agents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;

use crate::core::types::{DecompositionStep, Status, StepEvaluationResult, StepRecord};
use crate::io::config::{AgentProvider, EngineConfig};
use crate::io::executor::{CodexExecutor, CommandExecutor, Executor};
use crate::model::Story;

pub mod decomposer;
pub mod summarizer;
pub mod verifier;

pub use decomposer::DecomposerAgent;
pub use summarizer::DigestSummarizer;
pub use verifier::VerifierAgent;

/// Input for verifying one requirement step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRequest {
    pub goal: String,
    pub assertions: Vec<String>,
    /// Facts established by every earlier step of the story.
    pub given_facts: Vec<String>,
    pub workdir: PathBuf,
}

#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, story: &Story, workdir: &Path) -> Result<Vec<DecompositionStep>>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, request: &StepRequest) -> Result<StepEvaluationResult>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, story: &Story, status: Status, steps: &[StepRecord]) -> String;
}

/// Shared timeout and output bound for executor-backed agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// The collaborators a story evaluation needs.
#[derive(Clone)]
pub struct AgentSet {
    pub decomposer: Arc<dyn Decomposer>,
    pub verifier: Arc<dyn Verifier>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl AgentSet {
    /// Build agents for the configured provider.
    ///
    /// Errors when the provider settings are incomplete.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let executor: Arc<dyn Executor> = match cfg.agent.provider {
            AgentProvider::Codex => Arc::new(CodexExecutor::new(
                cfg.agent.model.clone(),
                cfg.state_dir.join("agent"),
            )),
            AgentProvider::Command => {
                if cfg.agent.command.is_empty() {
                    return Err(anyhow!(
                        "agent.command is required when provider = \"command\""
                    ));
                }
                Arc::new(CommandExecutor::new(cfg.agent.command.clone())?)
            }
        };
        let limits = AgentLimits {
            timeout: Duration::from_secs(cfg.agent.timeout_secs),
            output_limit_bytes: cfg.agent.output_limit_bytes,
        };
        Ok(Self::with_executor(executor, limits))
    }

    /// Executor-backed decomposer and verifier plus the digest summarizer.
    pub fn with_executor(executor: Arc<dyn Executor>, limits: AgentLimits) -> Self {
        Self {
            decomposer: Arc::new(DecomposerAgent::new(executor.clone(), limits)),
            verifier: Arc::new(VerifierAgent::new(executor, limits)),
            summarizer: Arc::new(DigestSummarizer),
        }
    }
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::AgentConfig;

    #[test]
    fn command_provider_without_command_is_rejected() {
        let cfg = EngineConfig {
            agent: AgentConfig {
                provider: AgentProvider::Command,
                ..AgentConfig::default()
            },
            ..EngineConfig::default()
        };
        let err = AgentSet::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("agent.command"));
    }

    #[test]
    fn builds_codex_and_command_sets() {
        assert!(AgentSet::from_config(&EngineConfig::default()).is_ok());
        let cfg = EngineConfig {
            agent: AgentConfig {
                provider: AgentProvider::Command,
                command: vec!["my-agent".to_string(), "--json".to_string()],
                ..AgentConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(AgentSet::from_config(&cfg).is_ok());
    }
}
