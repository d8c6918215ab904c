//! Run pipeline: the ordered workflow that tests one commit.
//!
//! A pipeline is constructed once per commit and executed exactly once.
//! Steps run strictly in order; the first failure skips everything up
//! to cleanup. Cleanup always runs, and exactly one terminal status is
//! reported whatever happened before it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::commit::CommitRef;
use crate::config::RunnerConfig;
use crate::deps::{DependencyInstaller, ManifestError};
use crate::error::{PipelineError, Result, ValidationError};
use crate::fetch::RepoFetcher;
use crate::log::EventLog;
use crate::plugin::{RunnerEvent, RunnerOptions, RunnerRegistry};
use crate::sandbox;
use crate::status::{CommitState, StatusSink};

/// Test configuration file a commit must carry to be testable.
const TEST_CONFIG: &str = "tests/tests.json";
/// Dependency manifest at the package root.
const MANIFEST: &str = "bower.json";
/// Package-manager configuration pinning installs to sibling dirs.
const INSTALLER_RC: &str = ".bowerrc";

/// Parsed contents of `tests/tests.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestMetadata {
    /// Name of the test runner the commit wants. Must be allow-listed.
    #[serde(default)]
    pub runner: Option<String>,
}

/// Shared state threaded through the steps. Each field is written by
/// exactly one step and read only by later ones.
#[derive(Debug, Default)]
struct WorkflowState {
    /// Set by `make_sandbox`.
    sandbox: Option<PathBuf>,
    /// Set by `fetch_repo`, moved by `make_package_sandbox`, consumed
    /// by `cleanup`.
    root: Option<PathBuf>,
    /// Set by `eval_metadata`, with a validated runner name.
    metadata: Option<TestMetadata>,
}

impl WorkflowState {
    fn sandbox(&self) -> &std::path::Path {
        self.sandbox
            .as_deref()
            .expect("sandbox is created before any step reads it")
    }

    fn root(&self) -> &std::path::Path {
        self.root
            .as_deref()
            .expect("repo is fetched before any step reads its root")
    }

    fn runner_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.runner.as_deref())
            .expect("metadata is evaluated before the runner is used")
    }
}

/// Outcome summary of one executed pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier of this execution.
    pub run_id: Uuid,
    /// `owner/repo/sha` of the commit that was tested.
    pub commit_key: String,
    /// Whether the run ended in a success status.
    pub success: bool,
    /// Terminal status reported to the status sink.
    pub status: CommitState,
    /// Terminal status message.
    pub message: String,
    /// Wall-clock duration of the whole run.
    pub duration_ms: u64,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

/// Manages the workflow required to test one commit.
pub struct RunPipeline {
    commit: CommitRef,
    config: RunnerConfig,
    log: EventLog,
    status: Arc<dyn StatusSink>,
    fetcher: Arc<dyn RepoFetcher>,
    installer: Arc<dyn DependencyInstaller>,
    runners: Arc<RunnerRegistry>,
    state: WorkflowState,
    run_id: Uuid,
}

impl RunPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        commit: CommitRef,
        config: RunnerConfig,
        log: EventLog,
        status: Arc<dyn StatusSink>,
        fetcher: Arc<dyn RepoFetcher>,
        installer: Arc<dyn DependencyInstaller>,
        runners: Arc<RunnerRegistry>,
    ) -> Self {
        RunPipeline {
            commit,
            config,
            log,
            status,
            fetcher,
            installer,
            runners,
            state: WorkflowState::default(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Drive the run to completion and report its terminal status.
    pub async fn execute(mut self) -> RunReport {
        let span = tracing::info_span!("run", id = %self.run_id, commit = %self.commit);
        let started = Instant::now();
        async move {
            info!("starting test run");
            let outcome = self.run_steps().await;
            self.cleanup().await;
            self.report(outcome, started).await
        }
        .instrument(span)
        .await
    }

    /// The fixed step list. `?` gives the fail-fast contract: the first
    /// error skips every remaining step, including the `group_end`s —
    /// the trace simply stops where the run stopped.
    async fn run_steps(&mut self) -> Result<()> {
        self.log.info("Starting test run").await?;

        self.log.group("Setup").await?;
        self.set_status(CommitState::Pending, "Cloning").await?;
        self.make_sandbox().await?;
        self.fetch_repo().await?;
        self.read_commit_details().await?;
        self.eval_metadata().await?;
        self.set_status(CommitState::Pending, "Fetching Dependencies")
            .await?;
        self.make_package_sandbox().await?;
        self.install_dependencies().await?;
        self.log.group_end().await?;

        self.log.group("Testing").await?;
        self.set_status(CommitState::Pending, "Spinning Up").await?;
        self.run_tests().await?;
        self.log.group_end().await?;

        self.log.info("Test run complete").await?;
        Ok(())
    }

    // Steps

    async fn make_sandbox(&mut self) -> Result<()> {
        let path = sandbox::create_sandbox()
            .map_err(|e| PipelineError::Internal(format!("failed to create sandbox: {e}")))?;
        self.log
            .info(&format!("Working within sandbox: {}", path.display()))
            .await?;
        self.state.sandbox = Some(path);
        Ok(())
    }

    async fn fetch_repo(&mut self) -> Result<()> {
        let root = self.state.sandbox().join("_repo");
        self.fetcher.clone_commit(&self.commit, &root).await?;
        self.state.root = Some(root);
        Ok(())
    }

    async fn read_commit_details(&mut self) -> Result<()> {
        let details = self.fetcher.read_commit_details(self.state.root()).await?;
        self.commit.author = Some(details.author);
        self.commit.comment = Some(details.comment);
        Ok(())
    }

    async fn eval_metadata(&mut self) -> Result<()> {
        self.log.info(&format!("Validating {TEST_CONFIG}")).await?;
        let path = self.state.root().join(TEST_CONFIG);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|_| ValidationError::MissingTestConfig)?;
        let metadata: TestMetadata = serde_json::from_slice(&data)
            .map_err(|e| ValidationError::UnparseableTestConfig(e.to_string()))?;

        let runner_name = metadata.runner.clone().unwrap_or_default();
        if runner_name.is_empty() || !self.config.worker.valid_runners.contains(&runner_name) {
            return Err(ValidationError::RunnerNotAllowed(runner_name).into());
        }
        self.state.metadata = Some(metadata);
        Ok(())
    }

    async fn make_package_sandbox(&mut self) -> Result<()> {
        let manifest_path = self.state.root().join(MANIFEST);
        let manifest = self
            .installer
            .resolve_manifest(&manifest_path)
            .await
            .map_err(|e| match e {
                ManifestError::MissingName => ValidationError::MissingPackageName,
                other => ValidationError::InvalidManifest(other.to_string()),
            })?;

        // The package name comes from the commit under test; make sure
        // it cannot address anything outside our sandbox.
        let target = sandbox::resolve_inside(self.state.sandbox(), &manifest.name)
            .ok_or_else(|| ValidationError::UnsafePackageName(manifest.name.clone()))?;

        tokio::fs::rename(self.state.root(), &target)
            .await
            .map_err(|e| {
                PipelineError::Internal(format!("failed to move package into sandbox: {e}"))
            })?;
        self.state.root = Some(target);
        Ok(())
    }

    async fn install_dependencies(&mut self) -> Result<()> {
        let root = self.state.root().to_path_buf();
        // Dependencies must resolve as siblings of the package so the
        // runner can serve the whole sandbox as one component tree.
        tokio::fs::write(root.join(INSTALLER_RC), br#"{"directory": "../"}"#)
            .await
            .map_err(|e| {
                PipelineError::Internal(format!("failed to write {INSTALLER_RC}: {e}"))
            })?;

        self.log.info("Installing dependencies").await?;
        self.installer.install(&root).await?;
        Ok(())
    }

    async fn run_tests(&mut self) -> Result<()> {
        let runner_name = self.state.runner_name().to_string();
        self.log
            .group(&format!(
                "Executing test runner {}",
                style(&runner_name).green()
            ))
            .await?;
        // Whatever happens in there, the group closes before the result
        // moves up the pipeline.
        let outcome = self.drive_runner(&runner_name).await;
        self.log.group_end().await?;
        outcome
    }

    async fn drive_runner(&mut self, runner_name: &str) -> Result<()> {
        let plugin = self.runners.get(runner_name).ok_or_else(|| {
            PipelineError::Internal(format!("test runner {runner_name:?} is not registered"))
        })?;

        let component = self
            .state
            .root()
            .file_name()
            .expect("package root has a directory name")
            .to_string_lossy()
            .into_owned();
        let (tx, mut rx) = mpsc::channel(64);
        let options = RunnerOptions {
            output: tx,
            root: self.state.sandbox().to_path_buf(),
            component,
            service: self.config.service.clone(),
        };

        let task = tokio::spawn(async move { plugin.run(options).await });

        // Serialize runner events into the log in arrival order.
        let mut stream_failure: Option<PipelineError> = None;
        while let Some(event) = rx.recv().await {
            let result = match event {
                RunnerEvent::RunStart => {
                    self.set_status(CommitState::Pending, "Running Tests").await
                }
                RunnerEvent::Output(line) => self.log.info(&line).await.map_err(Into::into),
            };
            if let Err(err) = result {
                stream_failure = Some(err);
                break;
            }
        }
        // If we bailed early the plugin may still be sending; dropping
        // the receiver unblocks it so the completion can be collected.
        drop(rx);

        let completion = task.await;
        if let Some(err) = stream_failure {
            return Err(err);
        }
        match completion {
            Ok(Ok(())) => Ok(()),
            Ok(Err(runner_err)) => Err(PipelineError::Runner(runner_err)),
            Err(join_err) => {
                warn!(error = %join_err, "test runner task died");
                Err(PipelineError::Incomplete)
            }
        }
    }

    /// Remove the working tree, if one was ever created. Taking the
    /// path out of the state makes a second call a no-op, and cleanup
    /// problems never fail the run.
    async fn cleanup(&mut self) {
        if let Some(root) = self.state.root.take() {
            sandbox::remove_tree(&root).await;
        }
    }

    async fn report(mut self, outcome: Result<()>, started: Instant) -> RunReport {
        let failure = match outcome {
            Ok(()) => None,
            Err(err) => {
                error!(error = %err, "test run aborted");
                if let Err(log_err) = self.log.fatal(&err, "Test run aborted:").await {
                    warn!(error = %log_err, "failed to record abort in trace");
                }
                Some(err.into_failure())
            }
        };

        let (status, message) = match &failure {
            None => (CommitState::Success, "tests passed".to_string()),
            Some(f) => (f.status, f.message.clone()),
        };
        if let Err(err) = self.status.set_status(&self.commit, status, &message).await {
            warn!(error = %err, "failed to report terminal status");
        }

        let success = failure.is_none();
        info!(success, status = %status, "test run finished");
        RunReport {
            run_id: self.run_id,
            commit_key: self.commit.key.clone(),
            success,
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    // Util

    async fn set_status(&mut self, state: CommitState, text: &str) -> Result<()> {
        self.status
            .set_status(&self.commit, state, text)
            .await
            .map_err(|e| PipelineError::Status(e.to_string()))
    }
}
