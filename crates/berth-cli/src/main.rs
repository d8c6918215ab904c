//! Berth CLI - test one commit in an isolated sandbox
//!
//! Identifies a commit (positional args or a webhook payload file),
//! wires the production collaborators together, and drives a single
//! run to its terminal status. Exit code 0 means the run succeeded.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use berth_ci::{
    BowerInstaller, CommitRef, EventLog, GitFetcher, GithubConfig, GithubStatusSink,
    NullStatusSink, ProcessRunner, RunPipeline, RunnerConfig, RunnerRegistry, StatusSink,
};
use berth_state::fakes::MemoryTraceStore;
use berth_state::TraceHandle;

#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Test one commit in an isolated sandbox", long_about = None)]
struct Cli {
    /// Commit identity: OWNER REPO SHA BRANCH
    #[arg(value_names = ["OWNER", "REPO", "SHA", "BRANCH"], num_args = 0..=4)]
    commit: Vec<String>,

    /// Webhook payload file naming the commit, instead of positional args
    #[arg(long, conflicts_with = "commit")]
    payload: Option<PathBuf>,

    /// Shape of the payload file
    #[arg(long, value_enum, requires = "payload", default_value = "push")]
    event: EventKind,

    /// Worker configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Program to execute for allow-listed runners (default: the runner name)
    #[arg(long)]
    runner_command: Option<String>,

    /// Write the recorded trace as JSON after the run
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// GitHub token for commit status updates (statuses are skipped without one)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EventKind {
    Push,
    PullRequest,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let commit = resolve_commit(&cli)?;
    let config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    if config.worker.valid_runners.is_empty() {
        warn!("no test runners are allow-listed; every commit will be rejected");
    }

    let mut registry = RunnerRegistry::new();
    for name in &config.worker.valid_runners {
        let program = cli.runner_command.clone().unwrap_or_else(|| name.clone());
        registry.register(name.clone(), Arc::new(ProcessRunner::new(program, Vec::new())));
    }

    let status: Arc<dyn StatusSink> = match &cli.github_token {
        Some(token) => Arc::new(GithubStatusSink::new(GithubConfig::new(token.clone()))),
        None => {
            info!("no GitHub token configured; commit statuses will not be reported");
            Arc::new(NullStatusSink)
        }
    };

    let store = Arc::new(MemoryTraceStore::new());
    let root = TraceHandle::for_run(&commit.key);
    let log = EventLog::open(
        Box::new(std::io::stdout()),
        &commit,
        store.clone(),
        root.clone(),
    )
    .await?;

    let pipeline = RunPipeline::new(
        commit,
        config,
        log,
        status,
        Arc::new(GitFetcher::new()),
        Arc::new(BowerInstaller::new()),
        Arc::new(registry),
    );
    let report = pipeline.execute().await;

    if let Some(path) = &cli.trace_out {
        let snapshot = store.snapshot(&root).context("trace root missing")?;
        std::fs::write(path, serde_json::to_vec_pretty(&snapshot)?)
            .with_context(|| format!("writing trace to {}", path.display()))?;
    }

    info!(
        status = %report.status,
        duration_ms = report.duration_ms,
        "{}",
        report.message
    );
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn resolve_commit(cli: &Cli) -> Result<CommitRef> {
    if let Some(path) = &cli.payload {
        let data = std::fs::read(path)
            .with_context(|| format!("reading payload from {}", path.display()))?;
        let commit = match cli.event {
            EventKind::Push => CommitRef::from_push_event(&serde_json::from_slice(&data)?)?,
            EventKind::PullRequest => {
                CommitRef::from_pull_request_event(&serde_json::from_slice(&data)?)?
            }
        };
        return Ok(commit);
    }
    match cli.commit.as_slice() {
        [owner, repo, sha, branch] => Ok(CommitRef::new(
            owner.as_str(),
            repo.as_str(),
            sha.as_str(),
            branch.as_str(),
        )?),
        [] => bail!("a commit is required: pass OWNER REPO SHA BRANCH or --payload FILE"),
        other => bail!(
            "expected OWNER REPO SHA BRANCH (got {} of 4 values)",
            other.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn positional_commit_resolves() {
        let cli = Cli::parse_from([
            "berth",
            "polyfills",
            "observe-js",
            "4f1c2d3e5a6b7c8d",
            "master",
        ]);
        let commit = resolve_commit(&cli).unwrap();
        assert_eq!(commit.key, "polyfills/observe-js/4f1c2d3e5a6b7c8d");
    }

    #[test]
    fn partial_positional_commit_is_rejected() {
        let cli = Cli::parse_from(["berth", "polyfills", "observe-js"]);
        assert!(resolve_commit(&cli).is_err());
    }

    #[test]
    fn payload_commit_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("push.json");
        std::fs::write(
            &path,
            r#"{
                "ref": "refs/heads/master",
                "repository": {"name": "observe-js", "owner": {"name": "polyfills"}},
                "head_commit": {"id": "4f1c2d3e5a6b7c8d"}
            }"#,
        )
        .unwrap();

        let cli = Cli::parse_from(["berth", "--payload", path.to_str().unwrap()]);
        let commit = resolve_commit(&cli).unwrap();
        assert_eq!(commit.branch, "master");
    }
}
