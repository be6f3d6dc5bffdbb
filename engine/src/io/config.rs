//! Engine configuration stored in `storycheck.toml`.
//!
//! Loaded once at startup and passed explicitly to every component.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "storycheck.toml";

/// Engine configuration (TOML).
///
/// Missing fields default to values suitable for a single local checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the run ledger, agent scratch files and schemas.
    pub state_dir: PathBuf,

    /// Maximum number of stories evaluated concurrently within one run.
    pub max_concurrency: usize,

    pub agent: AgentConfig,

    pub sandbox: SandboxConfig,

    pub checks: ChecksConfig,

    pub repos: Vec<RepoConfig>,
}

/// Which agent CLI backs decomposition and step verification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentProvider {
    /// `codex exec` with a read-only sandbox and an output schema.
    Codex,
    /// Arbitrary command reading the request on stdin and printing JSON.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: AgentProvider,

    /// Model override passed to the provider, if it supports one.
    pub model: Option<String>,

    /// Argument vector for `provider = "command"`.
    pub command: Vec<String>,

    /// Wall-clock budget for a single agent invocation in seconds.
    pub timeout_secs: u64,

    /// Truncate agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: AgentProvider::Codex,
            model: None,
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Detached `git worktree` per run under `scratch_dir`.
    Worktree,
    /// Evaluate directly in the configured checkout.
    InPlace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub kind: SandboxKind,
    /// Parent directory for worktrees. Relative paths resolve against `state_dir`.
    pub scratch_dir: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            kind: SandboxKind::Worktree,
            scratch_dir: PathBuf::from("sandboxes"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChecksConfig {
    /// Check name shown in the VCS UI.
    pub name: String,
    pub api_base: String,
    /// Environment variable holding the API token. Reporting goes to logs when unset.
    pub token_env: String,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            name: "storycheck".to_string(),
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub id: String,
    pub full_name: String,
    pub checkout: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// JSON array of stories. Relative paths resolve against the config file.
    pub stories_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".storycheck"),
            max_concurrency: 4,
            agent: AgentConfig::default(),
            sandbox: SandboxConfig::default(),
            checks: ChecksConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.provider == AgentProvider::Command
            && (self.agent.command.is_empty() || self.agent.command[0].trim().is_empty())
        {
            return Err(anyhow!(
                "agent.command must be a non-empty array when provider = \"command\""
            ));
        }
        if self.checks.name.trim().is_empty() {
            return Err(anyhow!("checks.name must not be empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for repo in &self.repos {
            if repo.id.trim().is_empty() {
                return Err(anyhow!("repos[].id must not be empty"));
            }
            if !seen.insert(repo.id.as_str()) {
                return Err(anyhow!("duplicate repo id '{}'", repo.id));
            }
            if !repo.full_name.contains('/') {
                return Err(anyhow!(
                    "repo '{}' full_name must look like owner/name",
                    repo.id
                ));
            }
        }
        Ok(())
    }

    /// Resolve the sandbox scratch directory against `state_dir`.
    pub fn scratch_dir(&self) -> PathBuf {
        if self.sandbox.scratch_dir.is_absolute() {
            self.sandbox.scratch_dir.clone()
        } else {
            self.state_dir.join(&self.sandbox.scratch_dir)
        }
    }

    /// Path of the persisted run ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("runs.json")
    }

    /// Open pull requests tracked for the push guard.
    pub fn pull_requests_path(&self) -> PathBuf {
        self.state_dir.join("pull_requests.json")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storycheck.toml");
        let cfg = EngineConfig {
            repos: vec![RepoConfig {
                id: "r1".to_string(),
                full_name: "acme/widgets".to_string(),
                checkout: PathBuf::from("/srv/widgets"),
                enabled: true,
                stories_file: Some(PathBuf::from("stories.json")),
            }],
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn unknown_provider_is_rejected_at_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storycheck.toml");
        fs::write(&path, "[agent]\nprovider = \"gateway\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unknown variant"), "{err:#}");
    }

    #[test]
    fn command_provider_requires_command() {
        let cfg = EngineConfig {
            agent: AgentConfig {
                provider: AgentProvider::Command,
                ..AgentConfig::default()
            },
            ..EngineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("agent.command"));
    }

    #[test]
    fn rejects_zero_concurrency_and_duplicate_repos() {
        let cfg = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let repo = RepoConfig {
            id: "r1".to_string(),
            full_name: "acme/widgets".to_string(),
            checkout: PathBuf::from("."),
            enabled: true,
            stories_file: None,
        };
        let cfg = EngineConfig {
            repos: vec![repo.clone(), repo],
            ..EngineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate repo id"));
    }

    #[test]
    fn scratch_dir_resolves_against_state_dir() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.scratch_dir(), PathBuf::from(".storycheck/sandboxes"));
    }
}
