//! Commit status sink: where the run reports its progress and outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commit::CommitRef;

/// Commit status states, as the forge's status API defines them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    Success,
    Error,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Error => "error",
            CommitState::Failure => "failure",
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status backend rejected or failed to deliver an update.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StatusError(pub String);

/// Destination for commit status updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_status(
        &self,
        commit: &CommitRef,
        state: CommitState,
        text: &str,
    ) -> Result<(), StatusError>;
}

/// Sink that drops updates on the floor, for runs without a configured
/// status backend.
#[derive(Debug, Default)]
pub struct NullStatusSink;

#[async_trait]
impl StatusSink for NullStatusSink {
    async fn set_status(
        &self,
        commit: &CommitRef,
        state: CommitState,
        text: &str,
    ) -> Result<(), StatusError> {
        debug!(commit = %commit, state = %state, text, "status update (no sink configured)");
        Ok(())
    }
}
