//! `storycheck`: evaluate a repository's stories against a commit.
//!
//! Reads `storycheck.toml`, runs stories through the configured agents, and
//! records runs in `<state_dir>/runs.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;

use engine::bootstrap::resolve_paths;
use engine::core::types::Status;
use engine::exit_codes;
use engine::io::catalog::{Catalog, MemoryCatalog};
use engine::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config, write_config};
use engine::io::run_store::{FileRunStore, RunStore};
use engine::logging;
use engine::observer::NoopObserver;
use engine::orchestrate::{Engine, EventOutcome, ExecuteOutcome};
use engine::trigger::{RepositoryEvent, RunRequest};

#[derive(Parser)]
#[command(
    name = "storycheck",
    version,
    about = "Evaluate user stories against repository commits"
)]
struct Cli {
    /// Path to the engine config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and create the state directory.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the config and every configured stories file.
    Validate,
    /// Evaluate a repository's stories at one commit.
    Run {
        /// Registered repo id.
        repo: String,
        /// Commit (or any revision the sandbox can resolve).
        #[arg(long)]
        sha: String,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Pull request number; enables the one-running-run-per-PR guard.
        #[arg(long)]
        pr: Option<u64>,
        #[arg(long, default_value = "")]
        message: String,
    },
    /// Feed a repository event (JSON file) through the trigger guard.
    Trigger {
        event: PathBuf,
    },
    /// List a repository's runs, newest first.
    Runs {
        repo: String,
    },
    /// Print a run as JSON.
    Show {
        run_id: String,
    },
    /// Print a story result as JSON.
    Result {
        result_id: String,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_dir = config_dir(&cli.config);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, &config_dir, force),
        Command::Validate => cmd_validate(&cli.config, &config_dir).await,
        Command::Run {
            repo,
            sha,
            branch,
            pr,
            message,
        } => {
            let request = RunRequest {
                repo_id: repo,
                pr_number: pr,
                branch_name: branch,
                commit_sha: sha,
                commit_message: message,
            };
            cmd_run(&cli.config, &config_dir, request).await
        }
        Command::Trigger { event } => cmd_trigger(&cli.config, &config_dir, &event).await,
        Command::Runs { repo } => cmd_runs(&cli.config, &config_dir, &repo).await,
        Command::Show { run_id } => {
            let store = open_store(&cli.config, &config_dir)?;
            let run = store
                .get_run(&run_id)
                .await?
                .ok_or_else(|| anyhow!("run '{run_id}' not found"))?;
            print_json(&run)?;
            Ok(exit_codes::OK)
        }
        Command::Result { result_id } => {
            let store = open_store(&cli.config, &config_dir)?;
            let result = store
                .get_result(&result_id)
                .await?
                .ok_or_else(|| anyhow!("result '{result_id}' not found"))?;
            print_json(&result)?;
            Ok(exit_codes::OK)
        }
    }
}

fn config_dir(config: &Path) -> PathBuf {
    match config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn cmd_init(config: &Path, config_dir: &Path, force: bool) -> Result<i32> {
    let cfg = if !force && config.exists() {
        load_config(config)?
    } else {
        let cfg = EngineConfig::default();
        write_config(config, &cfg)?;
        cfg
    };
    let state_dir = resolve_paths(&cfg, config_dir).state_dir;
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("create {}", state_dir.display()))?;
    Ok(exit_codes::OK)
}

async fn cmd_validate(config: &Path, config_dir: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let catalog = MemoryCatalog::from_config(&cfg, config_dir)?;
    for repo in &cfg.repos {
        let stories = catalog.stories(&repo.id).await?;
        println!("{}: {} stories", repo.id, stories.len());
    }
    Ok(exit_codes::OK)
}

async fn cmd_run(config: &Path, config_dir: &Path, request: RunRequest) -> Result<i32> {
    let engine = build_engine(config, config_dir)?;
    let outcome = engine.execute(request).await?;
    report_execute(&outcome)
}

async fn cmd_trigger(config: &Path, config_dir: &Path, event: &Path) -> Result<i32> {
    let raw =
        fs::read_to_string(event).with_context(|| format!("read event {}", event.display()))?;
    let event: RepositoryEvent = serde_json::from_str(&raw)
        .with_context(|| format!("parse event {}", event.display()))?;
    let engine = build_engine(config, config_dir)?;
    match engine.handle_event(&event).await? {
        EventOutcome::Ignored(reason) => {
            println!("ignored: {reason}");
            Ok(exit_codes::OK)
        }
        EventOutcome::Executed(outcome) => report_execute(&outcome),
    }
}

async fn cmd_runs(config: &Path, config_dir: &Path, repo: &str) -> Result<i32> {
    let store = open_store(config, config_dir)?;
    for run in store.list_runs(repo).await? {
        let short_sha: String = run.commit_sha.chars().take(7).collect();
        println!(
            "#{} {} {} {} {}",
            run.number,
            run.status,
            run.branch_name,
            short_sha,
            run.summary.as_deref().unwrap_or("")
        );
    }
    Ok(exit_codes::OK)
}

fn build_engine(config: &Path, config_dir: &Path) -> Result<Engine> {
    let cfg = load_config(config)?;
    Engine::from_config(&cfg, config_dir, Arc::new(NoopObserver))
}

fn open_store(config: &Path, config_dir: &Path) -> Result<FileRunStore> {
    let cfg = resolve_paths(&load_config(config)?, config_dir);
    FileRunStore::open(cfg.ledger_path())
}

fn report_execute(outcome: &ExecuteOutcome) -> Result<i32> {
    match outcome {
        ExecuteOutcome::AlreadyRunning(run) => {
            println!("run {} (#{}) is already running", run.id, run.number);
            Ok(exit_codes::OK)
        }
        ExecuteOutcome::Completed(summary) => {
            print_json(summary)?;
            Ok(exit_code_for(summary.status))
        }
    }
}

fn exit_code_for(status: Status) -> i32 {
    match status {
        Status::Pass | Status::Skipped => exit_codes::OK,
        Status::Fail => exit_codes::FAILED,
        Status::Error | Status::Running => exit_codes::ERRORED,
    }
}

/// Pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
