//! Integration tests for the run pipeline with stub collaborators and
//! the in-memory trace store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use berth_ci::{
    BowerInstaller, CommitDetails, CommitRef, CommitState, DependencyInstaller, EventLog,
    FetchError, InstallError, ManifestError, PackageManifest, RepoFetcher, RunPipeline, RunReport,
    RunnerConfig, RunnerError, RunnerEvent, RunnerOptions, RunnerRegistry, StatusError,
    StatusSink, TestRunnerPlugin,
};
use berth_state::fakes::MemoryTraceStore;
use berth_state::{EntryStyle, TraceHandle};

const RUNNER: &str = "stub-runner";

/// Fetcher that materializes a fake checkout instead of cloning.
struct StubFetcher {
    /// Contents for `tests/tests.json`; `None` leaves the file out.
    tests_json: Option<String>,
    /// Contents for `bower.json`; `None` leaves the file out.
    manifest: Option<String>,
}

impl StubFetcher {
    fn happy() -> Self {
        StubFetcher {
            tests_json: Some(format!(r#"{{"runner": "{RUNNER}"}}"#)),
            manifest: Some(r#"{"name": "observe-js"}"#.to_string()),
        }
    }
}

#[async_trait]
impl RepoFetcher for StubFetcher {
    async fn clone_commit(&self, _commit: &CommitRef, dest: &Path) -> Result<(), FetchError> {
        std::fs::create_dir_all(dest.join("tests")).unwrap();
        std::fs::write(dest.join("src.js"), "// source under test\n").unwrap();
        if let Some(tests_json) = &self.tests_json {
            std::fs::write(dest.join("tests/tests.json"), tests_json).unwrap();
        }
        if let Some(manifest) = &self.manifest {
            std::fs::write(dest.join("bower.json"), manifest).unwrap();
        }
        Ok(())
    }

    async fn read_commit_details(&self, _checkout: &Path) -> Result<CommitDetails, FetchError> {
        Ok(CommitDetails {
            author: "Jane Doe <jane@example.com>".to_string(),
            comment: "Fix the observer leak".to_string(),
        })
    }
}

/// Installer that skips the subprocess but records what it saw.
#[derive(Default)]
struct StubInstaller {
    rc_contents: Mutex<Option<String>>,
    install_root: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl DependencyInstaller for StubInstaller {
    async fn resolve_manifest(&self, path: &Path) -> Result<PackageManifest, ManifestError> {
        // Same manifest semantics as production; only install is stubbed.
        BowerInstaller::new().resolve_manifest(path).await
    }

    async fn install(&self, root: &Path) -> Result<(), InstallError> {
        *self.rc_contents.lock().unwrap() =
            std::fs::read_to_string(root.join(".bowerrc")).ok();
        *self.install_root.lock().unwrap() = Some(root.to_path_buf());
        Ok(())
    }
}

/// Plugin that immediately reports start, emits lines, and completes.
struct StubRunner {
    lines: Vec<String>,
    failure: Option<String>,
}

impl StubRunner {
    fn passing() -> Self {
        StubRunner {
            lines: vec!["suite started".to_string(), "12 passed".to_string()],
            failure: None,
        }
    }

    fn failing(message: &str) -> Self {
        StubRunner {
            lines: vec!["suite started".to_string()],
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl TestRunnerPlugin for StubRunner {
    async fn run(&self, options: RunnerOptions) -> Result<(), RunnerError> {
        let _ = options.output.send(RunnerEvent::RunStart).await;
        for line in &self.lines {
            let _ = options.output.send(RunnerEvent::Output(line.clone())).await;
        }
        match &self.failure {
            Some(message) => Err(RunnerError(message.clone())),
            None => Ok(()),
        }
    }
}

/// Status sink that records every update in order.
#[derive(Default)]
struct RecordingStatusSink {
    statuses: Mutex<Vec<(CommitState, String)>>,
}

impl RecordingStatusSink {
    fn seen(&self) -> Vec<(CommitState, String)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn set_status(
        &self,
        _commit: &CommitRef,
        state: CommitState,
        text: &str,
    ) -> Result<(), StatusError> {
        self.statuses
            .lock()
            .unwrap()
            .push((state, text.to_string()));
        Ok(())
    }
}

struct Harness {
    report: RunReport,
    store: Arc<MemoryTraceStore>,
    root: TraceHandle,
    statuses: Arc<RecordingStatusSink>,
    installer: Arc<StubInstaller>,
}

async fn run_pipeline(fetcher: StubFetcher, runner: StubRunner) -> Harness {
    let commit = CommitRef::new("polyfills", "observe-js", "4f1c2d3e5a6b7c8d", "master").unwrap();
    let store = Arc::new(MemoryTraceStore::new());
    let root = TraceHandle::for_run(&commit.key);
    let log = EventLog::open(
        Box::new(std::io::sink()),
        &commit,
        store.clone(),
        root.clone(),
    )
    .await
    .unwrap();

    let statuses = Arc::new(RecordingStatusSink::default());
    let installer = Arc::new(StubInstaller::default());
    let mut registry = RunnerRegistry::new();
    registry.register(RUNNER, Arc::new(runner));

    let pipeline = RunPipeline::new(
        commit,
        RunnerConfig::default().with_runner(RUNNER),
        log,
        statuses.clone(),
        Arc::new(fetcher),
        installer.clone(),
        Arc::new(registry),
    );
    let report = pipeline.execute().await;

    Harness {
        report,
        store,
        root,
        statuses,
        installer,
    }
}

/// Pull the sandbox path back out of the trace so tests can check what
/// was left on disk.
fn sandbox_path(harness: &Harness) -> PathBuf {
    let setup = harness.store.children(&harness.root)[1].clone();
    let line = &harness.store.entries(&setup)[0].line;
    let path = line
        .strip_prefix("Working within sandbox: ")
        .expect("sandbox line present");
    PathBuf::from(path)
}

#[tokio::test]
async fn happy_path_reports_success_and_a_two_group_trace() {
    let harness = run_pipeline(StubFetcher::happy(), StubRunner::passing()).await;

    assert!(harness.report.success);
    assert_eq!(harness.report.status, CommitState::Success);
    assert_eq!(harness.report.message, "tests passed");
    assert_eq!(harness.report.commit_key, "polyfills/observe-js/4f1c2d3e5a6b7c8d");

    // Exactly two top-level groups between the opening and closing info
    // entries.
    let top = harness.store.entries(&harness.root);
    let shapes: Vec<(EntryStyle, &str)> = top
        .iter()
        .map(|e| (e.style, e.line.as_str()))
        .collect();
    assert_eq!(shapes.len(), 4);
    assert_eq!(shapes[0], (EntryStyle::Info, "Starting test run"));
    assert_eq!(shapes[1].0, EntryStyle::Group);
    assert_eq!(shapes[1].1, "Setup");
    assert_eq!(shapes[2].0, EntryStyle::Group);
    assert_eq!(shapes[2].1, "Testing");
    assert_eq!(shapes[3], (EntryStyle::Info, "Test run complete"));

    // Both groups closed with non-negative durations.
    let children = harness.store.children(&harness.root);
    for group in &children[1..=2] {
        let duration = harness.store.duration(group).expect("group closed");
        assert!(duration >= 0.0);
    }

    // The testing group nests the runner group, which holds the
    // runner's output lines in arrival order.
    let testing = children[2].clone();
    let runner_groups = harness.store.children(&testing);
    assert_eq!(runner_groups.len(), 1);
    let runner_entries = harness.store.entries(&runner_groups[0]);
    let lines: Vec<&str> = runner_entries.iter().map(|e| e.line.as_str()).collect();
    assert_eq!(lines, ["suite started", "12 passed"]);

    // Status updates arrived in phase order with one terminal report.
    let seen = harness.statuses.seen();
    let states: Vec<&str> = seen.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(
        states,
        ["pending", "pending", "pending", "pending", "success"]
    );
    assert_eq!(seen[0].1, "Cloning");
    assert_eq!(seen[1].1, "Fetching Dependencies");
    assert_eq!(seen[2].1, "Spinning Up");
    assert_eq!(seen[3].1, "Running Tests");
    assert_eq!(seen[4].1, "tests passed");

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn happy_path_pins_dependency_resolution_to_siblings() {
    let harness = run_pipeline(StubFetcher::happy(), StubRunner::passing()).await;

    let rc = harness
        .installer
        .rc_contents
        .lock()
        .unwrap()
        .clone()
        .expect("installer saw the rc file");
    let parsed: serde_json::Value = serde_json::from_str(&rc).unwrap();
    assert_eq!(parsed, serde_json::json!({"directory": "../"}));

    // The checkout was moved under its package name before install.
    let install_root = harness.installer.install_root.lock().unwrap().clone().unwrap();
    assert_eq!(install_root.file_name().unwrap(), "observe-js");

    let sandbox = sandbox_path(&harness);
    assert!(sandbox.exists(), "sandbox is retained");
    assert!(
        !sandbox.join("observe-js").exists(),
        "working tree is cleaned up"
    );
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn missing_test_config_aborts_with_a_distinguishable_error() {
    let fetcher = StubFetcher {
        tests_json: None,
        ..StubFetcher::happy()
    };
    let harness = run_pipeline(fetcher, StubRunner::passing()).await;

    assert!(!harness.report.success);
    assert_eq!(harness.report.status, CommitState::Error);
    assert!(
        harness.report.message.contains("Missing tests/tests.json"),
        "got: {}",
        harness.report.message
    );

    // The terminal status carries the same message.
    let seen = harness.statuses.seen();
    let (state, text) = seen.last().unwrap();
    assert_eq!(*state, CommitState::Error);
    assert!(text.contains("Missing tests/tests.json"));

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn unparseable_test_config_aborts_distinctly() {
    let fetcher = StubFetcher {
        tests_json: Some("runner: not-json".to_string()),
        ..StubFetcher::happy()
    };
    let harness = run_pipeline(fetcher, StubRunner::passing()).await;

    assert!(!harness.report.success);
    assert!(harness.report.message.contains("Failed to parse tests/tests.json"));

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn unlisted_runner_is_rejected() {
    let fetcher = StubFetcher {
        tests_json: Some(r#"{"runner": "curl-pipe-sh"}"#.to_string()),
        ..StubFetcher::happy()
    };
    let harness = run_pipeline(fetcher, StubRunner::passing()).await;

    assert!(!harness.report.success);
    assert_eq!(harness.report.status, CommitState::Error);
    assert!(
        harness.report.message.contains(r#"Test runner "curl-pipe-sh" not whitelisted"#),
        "got: {}",
        harness.report.message
    );

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn traversal_package_names_are_rejected_before_any_move() {
    let fetcher = StubFetcher {
        manifest: Some(r#"{"name": "../../etc"}"#.to_string()),
        ..StubFetcher::happy()
    };
    let harness = run_pipeline(fetcher, StubRunner::passing()).await;

    assert!(!harness.report.success);
    assert_eq!(harness.report.status, CommitState::Error);
    assert!(
        harness.report.message.contains("Invalid package name"),
        "got: {}",
        harness.report.message
    );

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn missing_package_name_is_rejected() {
    let fetcher = StubFetcher {
        manifest: Some(r#"{"main": "src.js"}"#.to_string()),
        ..StubFetcher::happy()
    };
    let harness = run_pipeline(fetcher, StubRunner::passing()).await;

    assert!(!harness.report.success);
    assert!(harness.report.message.contains("package name is required"));

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}

#[tokio::test]
async fn runner_failure_reports_the_failure_status() {
    let harness =
        run_pipeline(StubFetcher::happy(), StubRunner::failing("3 of 12 tests failed")).await;

    assert!(!harness.report.success);
    assert_eq!(harness.report.status, CommitState::Failure);
    assert_eq!(harness.report.message, "3 of 12 tests failed");

    // The runner group was closed before the failure propagated.
    let testing = harness.store.children(&harness.root)[2].clone();
    let runner_group = harness.store.children(&testing)[0].clone();
    assert!(harness.store.duration(&runner_group).is_some());
    // But the run never got to its closing entry.
    let top = harness.store.entries(&harness.root);
    assert!(top.iter().all(|e| e.line != "Test run complete"));

    let seen = harness.statuses.seen();
    let (state, text) = seen.last().unwrap();
    assert_eq!(*state, CommitState::Failure);
    assert_eq!(text, "3 of 12 tests failed");

    let sandbox = sandbox_path(&harness);
    std::fs::remove_dir_all(&sandbox).ok();
}
