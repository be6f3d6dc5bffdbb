//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by runs and story entries.
///
/// `Running` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Pass,
    Fail,
    Skipped,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Skipped => "skipped",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conclusion of a single evaluated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepConclusion {
    Pass,
    Fail,
    Error,
}

impl From<StepConclusion> for Status {
    fn from(conclusion: StepConclusion) -> Self {
        match conclusion {
            StepConclusion::Pass => Status::Pass,
            StepConclusion::Fail => Status::Fail,
            StepConclusion::Error => Status::Error,
        }
    }
}

/// One ordered step produced by the decomposition collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecompositionStep {
    /// Precondition assumed true without verification.
    Given { statement: String },
    /// Goal plus assertions verified against the repository.
    Requirement {
        outcome: String,
        assertions: Vec<String>,
    },
}

impl DecompositionStep {
    pub fn kind(&self) -> StepKind {
        match self {
            DecompositionStep::Given { .. } => StepKind::Given,
            DecompositionStep::Requirement { .. } => StepKind::Requirement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Given,
    Requirement,
}

/// A verified fact and the evidence backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub fact: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Verdict for one step, produced once and appended to the story's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvaluationResult {
    pub conclusion: StepConclusion,
    pub outcome: String,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// Step entry as persisted inside an [`EvaluationAnalysis`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub conclusion: StepConclusion,
    pub outcome: String,
    pub assertions: Vec<Assertion>,
}

impl StepRecord {
    pub fn new(kind: StepKind, result: StepEvaluationResult) -> Self {
        Self {
            kind,
            conclusion: result.conclusion,
            outcome: result.outcome,
            assertions: result.assertions,
        }
    }
}

/// Current analysis format version.
pub const ANALYSIS_VERSION: u32 = 1;

/// Persisted, versioned record of one story evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationAnalysis {
    pub version: u32,
    pub status: Status,
    pub explanation: String,
    pub steps: Vec<StepRecord>,
}

/// Per-status tallies used by the run verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
}
