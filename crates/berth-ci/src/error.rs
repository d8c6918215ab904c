//! Error taxonomy for the run pipeline.

use crate::deps::InstallError;
use crate::fetch::FetchError;
use crate::plugin::RunnerError;
use crate::status::CommitState;

/// Errors produced by validating inputs to a run: the commit ref,
/// the checked-out commit's details, the test metadata file, and the
/// dependency manifest.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("commit is missing {field}")]
    MissingCommitField { field: &'static str },

    #[error("push ref {reference:?} does not name a branch")]
    NotABranchRef { reference: String },

    #[error("Invalid commit details: {raw}")]
    MalformedCommitDetails { raw: String },

    #[error("Missing tests/tests.json in package root")]
    MissingTestConfig,

    #[error("Failed to parse tests/tests.json: {0}")]
    UnparseableTestConfig(String),

    #[error("Test runner {0:?} not whitelisted")]
    RunnerNotAllowed(String),

    #[error("Invalid bower.json: {0}")]
    InvalidManifest(String),

    #[error("package name is required")]
    MissingPackageName,

    #[error("Invalid package name: {0}")]
    UnsafePackageName(String),
}

/// Any condition that aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("trace storage error: {0}")]
    Storage(#[from] berth_state::StorageError),

    #[error("status update failed: {0}")]
    Status(String),

    /// The test runner went away without ever reporting a result.
    #[error("Test run did not complete")]
    Incomplete,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Collapse this error into the terminal status to report for the run.
    ///
    /// A runner-reported failure is a `failure` commit state; everything
    /// else (validation, fetch, install, infrastructure) is an `error`.
    pub fn into_failure(self) -> RunFailure {
        let status = match self {
            PipelineError::Runner(_) => CommitState::Failure,
            _ => CommitState::Error,
        };
        RunFailure {
            status,
            message: self.to_string(),
        }
    }
}

/// Normalized terminal outcome of an aborted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub status: CommitState,
    pub message: String,
}

impl RunFailure {
    /// The outcome reported when a run dies without a concrete cause.
    pub fn incomplete() -> Self {
        PipelineError::Incomplete.into_failure()
    }
}

impl Default for RunFailure {
    fn default() -> Self {
        Self::incomplete()
    }
}

/// Result type for run pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
