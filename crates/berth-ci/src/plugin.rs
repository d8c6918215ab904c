//! Test-runner plugins.
//!
//! The pipeline never knows a runner's internals: it resolves a plugin
//! by name from the [`RunnerRegistry`], hands it a [`RunnerOptions`]
//! with an event channel, and treats the returned `Result` as the
//! runner's completion report. Plugins emit [`RunnerEvent::RunStart`]
//! once tests begin and one [`RunnerEvent::Output`] per output line;
//! the pipeline serializes those into the run log in arrival order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ServiceCredentials;

/// Progress signals a plugin sends while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    /// Tests have actually started (after any spin-up).
    RunStart,
    /// One line of runner output.
    Output(String),
}

/// Everything a plugin gets to work with.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Sink for progress events, consumed by the pipeline.
    pub output: mpsc::Sender<RunnerEvent>,
    /// Sandbox root containing the package and its sibling dependencies.
    pub root: PathBuf,
    /// Directory name of the package under test.
    pub component: String,
    /// Hosted browser service credentials.
    pub service: ServiceCredentials,
}

/// A test runner reported failure, or could not run at all.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RunnerError(pub String);

/// One pluggable test runner.
#[async_trait]
pub trait TestRunnerPlugin: Send + Sync {
    /// Run the tests. The returned result is the completion report and
    /// is produced exactly once.
    async fn run(&self, options: RunnerOptions) -> Result<(), RunnerError>;
}

/// Name → plugin table, populated at process start from the allow-list.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn TestRunnerPlugin>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn TestRunnerPlugin>) {
        self.runners.insert(name.into(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TestRunnerPlugin>> {
        self.runners.get(name).cloned()
    }

    /// Registered runner names, for startup diagnostics.
    pub fn names(&self) -> Vec<&str> {
        self.runners.keys().map(String::as_str).collect()
    }
}

/// Plugin that runs a local command in the sandbox and streams its
/// stdout, line by line, as runner output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TestRunnerPlugin for ProcessRunner {
    async fn run(&self, options: RunnerOptions) -> Result<(), RunnerError> {
        debug!(program = %self.program, component = %options.component, "spawning test runner");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&options.root)
            .env("BERTH_COMPONENT", &options.component)
            .env("SERVICE_USERNAME", &options.service.username)
            .env("SERVICE_ACCESS_KEY", &options.service.access_key)
            .env("SERVICE_TUNNEL_ID", &options.service.tunnel_id)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RunnerError(format!("failed to spawn {}: {e}", self.program)))?;

        let _ = options.output.send(RunnerEvent::RunStart).await;

        let stdout = child.stdout.take().expect("stdout piped above");
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    // Receiver gone means the run is being torn down.
                    if options.output.send(RunnerEvent::Output(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = child.kill().await;
                    return Err(RunnerError(format!("failed reading runner output: {e}")));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| RunnerError(format!("failed waiting for {}: {e}", self.program)))?;
        if !status.success() {
            return Err(RunnerError(format!(
                "{} exited with code {}",
                self.program,
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}
