//! Test-only fixtures and scripted collaborators.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::agents::{AgentLimits, Decomposer, StepRequest, Verifier};
use crate::controller::NewRun;
use crate::core::check_run::{CheckRunContent, CheckRunId};
use crate::core::types::{
    ANALYSIS_VERSION, Assertion, DecompositionStep, EvaluationAnalysis, Status, StepConclusion,
    StepEvaluationResult, StepKind,
};
use crate::dispatch::StoryRunner;
use crate::io::catalog::{Catalog, PullRequestRef};
use crate::io::check_api::CheckRunApi;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::run_store::{Ledger, MemoryRunStore, RunStore, RunUpdate};
use crate::io::sandbox::{SandboxHandle, SandboxProvider};
use crate::model::{RepoRecord, Run, Settled, Story, StoryResult, StoryRunEntry, StoryVerdict};
use crate::observer::RunObserver;

/// Enabled repo `id` named `acme/<id>`.
pub fn sample_repo(id: &str) -> RepoRecord {
    RepoRecord {
        id: id.to_string(),
        full_name: format!("acme/{id}"),
        checkout: PathBuf::from(format!("/srv/{id}")),
        enabled: true,
    }
}

pub fn sample_story(repo_id: &str, id: &str) -> Story {
    Story {
        id: id.to_string(),
        repo_id: repo_id.to_string(),
        title: format!("Story {id}"),
        text: format!("As a user, {id} works end to end"),
        enabled: true,
    }
}

/// Stories `s1..=sN`.
pub fn sample_stories(repo_id: &str, count: usize) -> Vec<Story> {
    (1..=count)
        .map(|n| sample_story(repo_id, &format!("s{n}")))
        .collect()
}

/// A `running` run on `main` with one running entry per story id.
pub fn sample_run(repo_id: &str, number: u64, story_ids: &[&str]) -> Run {
    let now = Utc::now();
    Run {
        id: Uuid::new_v4().to_string(),
        repo_id: repo_id.to_string(),
        pr_number: None,
        branch_name: "main".to_string(),
        commit_sha: "0123456789abcdef0123456789abcdef01234567".to_string(),
        commit_message: "test commit".to_string(),
        number,
        status: Status::Running,
        summary: None,
        stories: story_ids
            .iter()
            .map(|id| StoryRunEntry::running(*id, now))
            .collect(),
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_new_run(repo_id: &str, pr_number: Option<u64>) -> NewRun {
    NewRun {
        repo_id: repo_id.to_string(),
        pr_number,
        branch_name: "feature".to_string(),
        commit_sha: "0123456789abcdef0123456789abcdef01234567".to_string(),
        commit_message: "test commit".to_string(),
    }
}

pub fn sample_result(run_id: &str, story_id: &str) -> StoryResult {
    StoryResult {
        id: Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        story_id: story_id.to_string(),
        analysis: EvaluationAnalysis {
            version: ANALYSIS_VERSION,
            status: Status::Pass,
            explanation: format!("{story_id}: pass"),
            steps: Vec::new(),
        },
        created_at: Utc::now(),
    }
}

pub fn sample_sandbox(repo_id: &str) -> SandboxHandle {
    SandboxHandle {
        id: format!("{repo_id}-sandbox"),
        repo_id: repo_id.to_string(),
        commit_sha: "0123456789abcdef0123456789abcdef01234567".to_string(),
        workdir: PathBuf::from(format!("/tmp/{repo_id}-sandbox")),
        source: PathBuf::from(format!("/srv/{repo_id}")),
    }
}

pub fn test_limits() -> AgentLimits {
    AgentLimits {
        timeout: Duration::from_secs(5),
        output_limit_bytes: 64 * 1024,
    }
}

pub fn verdict(conclusion: StepConclusion) -> StepEvaluationResult {
    verdict_with_facts(conclusion, &[])
}

/// A verifier result whose assertions carry `facts` in order.
pub fn verdict_with_facts(conclusion: StepConclusion, facts: &[&str]) -> StepEvaluationResult {
    StepEvaluationResult {
        conclusion,
        outcome: format!("step {conclusion:?}").to_lowercase(),
        assertions: facts
            .iter()
            .map(|fact| Assertion {
                fact: (*fact).to_string(),
                evidence: Vec::new(),
            })
            .collect(),
    }
}

fn scripted_error(message: String) -> anyhow::Error {
    anyhow!(message)
}

/// Executor that replays canned outputs and records every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn exec(&self, request: &ExecRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(scripted_error(message)),
            None => Err(anyhow!("{} script exhausted", request.label)),
        }
    }
}

/// Verifier that replays canned results and records every request.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<Result<StepEvaluationResult, String>>>,
    requests: Mutex<Vec<StepRequest>>,
}

impl ScriptedVerifier {
    pub fn new(script: Vec<Result<StepEvaluationResult, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, request: &StepRequest) -> Result<StepEvaluationResult> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(scripted_error(message)),
            None => Err(anyhow!("verifier script exhausted")),
        }
    }
}

/// Decomposer returning the same steps for every story, or always failing.
#[derive(Debug, Clone)]
pub struct ScriptedDecomposer {
    outcome: Result<Vec<DecompositionStep>, String>,
}

impl ScriptedDecomposer {
    pub fn steps(steps: Vec<DecompositionStep>) -> Self {
        Self { outcome: Ok(steps) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl Decomposer for ScriptedDecomposer {
    async fn decompose(
        &self,
        _story: &Story,
        _workdir: &std::path::Path,
    ) -> Result<Vec<DecompositionStep>> {
        self.outcome.clone().map_err(scripted_error)
    }
}

/// Observer recording each hook as a short line.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl RunObserver for RecordingObserver {
    fn on_run_start(&self, run: &Run) {
        self.push(format!("run_start {}", run.number));
    }

    fn on_step_start(&self, _run_id: &str, story_id: &str, index: usize, _kind: StepKind) {
        self.push(format!("step_start {story_id} {index}"));
    }

    fn on_step_complete(
        &self,
        _run_id: &str,
        story_id: &str,
        index: usize,
        conclusion: StepConclusion,
    ) {
        self.push(format!("step_complete {story_id} {index} {conclusion:?}"));
    }

    fn on_story_complete(&self, _run_id: &str, settled: &Settled) {
        self.push(format!("story_complete {} {}", settled.story_id, settled.status()));
    }

    fn on_run_complete(&self, _run_id: &str, status: Status, summary: &str) {
        self.push(format!("run_complete {status} {summary}"));
    }
}

/// Story runner that passes every story except the scripted ones.
///
/// Listed stories either return an error (`<id> exploded`) or panic
/// (`<id> panicked`). Tracks the peak number of concurrent calls.
#[derive(Debug, Default)]
pub struct FailingStoryRunner {
    erroring: Vec<String>,
    panicking: Vec<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl FailingStoryRunner {
    pub fn erroring(story_ids: &[&str]) -> Self {
        Self {
            erroring: story_ids.iter().map(|id| (*id).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking(story_ids: &[&str]) -> Self {
        Self {
            panicking: story_ids.iter().map(|id| (*id).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryRunner for FailingStoryRunner {
    async fn run_story(
        &self,
        _run: &Run,
        story: &Story,
        _sandbox: &SandboxHandle,
    ) -> Result<StoryVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&story.id) {
            panic!("{} panicked", story.id);
        }
        if self.erroring.contains(&story.id) {
            return Err(anyhow!("{} exploded", story.id));
        }
        Ok(StoryVerdict {
            status: Status::Pass,
            result_id: format!("result-{}", story.id),
        })
    }
}

/// Sandbox provider counting provisions and releases.
#[derive(Debug, Default)]
pub struct RecordingSandbox {
    fail_provision: bool,
    fail_release: bool,
    provisioned: AtomicUsize,
    released: AtomicUsize,
}

impl RecordingSandbox {
    pub fn failing_provision() -> Self {
        Self {
            fail_provision: true,
            ..Self::default()
        }
    }

    pub fn failing_release() -> Self {
        Self {
            fail_release: true,
            ..Self::default()
        }
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxProvider for RecordingSandbox {
    async fn provision(&self, repo: &RepoRecord, commit_sha: &str) -> Result<SandboxHandle> {
        if self.fail_provision {
            return Err(anyhow!("no capacity for {}", repo.id));
        }
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        let mut handle = sample_sandbox(&repo.id);
        handle.commit_sha = commit_sha.to_string();
        Ok(handle)
    }

    async fn release(&self, handle: SandboxHandle) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(anyhow!("could not remove {}", handle.id));
        }
        Ok(())
    }
}

/// Check-run API that records calls and can fail either operation.
///
/// Created ids start at 1000.
#[derive(Debug)]
pub struct FlakyCheckApi {
    fail_updates: bool,
    fail_creates: bool,
    next_id: AtomicUsize,
    calls: Mutex<Vec<String>>,
    contents: Mutex<Vec<CheckRunContent>>,
}

impl Default for FlakyCheckApi {
    fn default() -> Self {
        Self {
            fail_updates: false,
            fail_creates: false,
            next_id: AtomicUsize::new(1000),
            calls: Mutex::new(Vec::new()),
            contents: Mutex::new(Vec::new()),
        }
    }
}

impl FlakyCheckApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn fail_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Every payload submitted, in call order.
    pub fn contents(&self) -> Vec<CheckRunContent> {
        self.contents.lock().expect("contents lock").clone()
    }

    fn record(&self, call: String, content: &CheckRunContent) {
        self.calls.lock().expect("calls lock").push(call);
        self.contents
            .lock()
            .expect("contents lock")
            .push(content.clone());
    }
}

#[async_trait]
impl CheckRunApi for FlakyCheckApi {
    async fn create(
        &self,
        _repo: &RepoRecord,
        _commit_sha: &str,
        content: &CheckRunContent,
    ) -> Result<CheckRunId> {
        if self.fail_creates {
            self.record("create failed".to_string(), content);
            return Err(anyhow!("create rejected"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.record(format!("create {id}"), content);
        Ok(CheckRunId(id))
    }

    async fn update(
        &self,
        _repo: &RepoRecord,
        id: CheckRunId,
        content: &CheckRunContent,
    ) -> Result<()> {
        self.record(format!("update {}", id.0), content);
        if self.fail_updates {
            return Err(anyhow!("update rejected"));
        }
        Ok(())
    }
}

/// Run store whose terminal writes fail; everything else hits memory.
#[derive(Debug, Default)]
pub struct FailingUpdateStore {
    inner: MemoryRunStore,
}

impl FailingUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Ledger {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl RunStore for FailingUpdateStore {
    async fn next_run_number(&self, repo_id: &str) -> Result<u64> {
        self.inner.next_run_number(repo_id).await
    }

    async fn insert_run(&self, run: Run) -> Result<()> {
        self.inner.insert_run(run).await
    }

    async fn insert_numbered(&self, run: Run) -> Result<Run> {
        self.inner.insert_numbered(run).await
    }

    async fn update_run(&self, run_id: &str, _update: RunUpdate) -> Result<()> {
        Err(anyhow!("disk full while updating {run_id}"))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.inner.get_run(run_id).await
    }

    async fn find_running_run(&self, repo_id: &str, pr_number: u64) -> Result<Option<Run>> {
        self.inner.find_running_run(repo_id, pr_number).await
    }

    async fn list_runs(&self, repo_id: &str) -> Result<Vec<Run>> {
        self.inner.list_runs(repo_id).await
    }

    async fn insert_result(&self, result: StoryResult) -> Result<String> {
        self.inner.insert_result(result).await
    }

    async fn get_result(&self, result_id: &str) -> Result<Option<StoryResult>> {
        self.inner.get_result(result_id).await
    }
}

/// Catalog whose backend is down: every call fails.
#[derive(Debug, Default)]
pub struct UnavailableCatalog;

#[async_trait]
impl Catalog for UnavailableCatalog {
    async fn repo(&self, _repo_id: &str) -> Result<Option<RepoRecord>> {
        Err(anyhow!("catalog backend unavailable"))
    }

    async fn repo_by_name(&self, _full_name: &str) -> Result<Option<RepoRecord>> {
        Err(anyhow!("catalog backend unavailable"))
    }

    async fn stories(&self, _repo_id: &str) -> Result<Vec<Story>> {
        Err(anyhow!("catalog backend unavailable"))
    }

    async fn open_pull_request(&self, _repo_id: &str, _branch: &str) -> Result<Option<u64>> {
        Err(anyhow!("catalog backend unavailable"))
    }

    async fn record_pull_request(
        &self,
        _repo_id: &str,
        _pr: PullRequestRef,
        _open: bool,
    ) -> Result<()> {
        Err(anyhow!("catalog backend unavailable"))
    }
}
