//! Berth CI - Commit Test-Run Orchestration
//!
//! Drives a single continuous-integration test run for one commit:
//! - Prepares an isolated sandbox and fetches the commit into it
//! - Validates the commit's test metadata and installs its dependencies
//! - Invokes the allow-listed test runner plugin and streams its output
//! - Reports pending/success/error/failure to the commit status sink
//! - Records a hierarchical, time-annotated trace of the whole run

pub mod commit;
pub mod config;
pub mod deps;
pub mod error;
pub mod fetch;
pub mod github;
pub mod log;
pub mod pipeline;
pub mod plugin;
pub mod sandbox;
pub mod status;

// Re-export key types
pub use commit::{CommitRef, PullRequestEvent, PushEvent};
pub use config::{ConfigError, RunnerConfig, ServiceCredentials, WorkerConfig};
pub use deps::{BowerInstaller, DependencyInstaller, InstallError, ManifestError, PackageManifest};
pub use error::{PipelineError, Result, RunFailure, ValidationError};
pub use fetch::{CommitDetails, FetchError, GitFetcher, RepoFetcher};
pub use github::{GithubConfig, GithubStatusSink};
pub use log::EventLog;
pub use pipeline::{RunPipeline, RunReport, TestMetadata};
pub use plugin::{
    ProcessRunner, RunnerError, RunnerEvent, RunnerOptions, RunnerRegistry, TestRunnerPlugin,
};
pub use status::{CommitState, NullStatusSink, StatusError, StatusSink};
