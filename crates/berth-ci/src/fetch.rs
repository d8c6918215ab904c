//! Repository fetcher: materializes the commit under test into the
//! sandbox and reads its commit details.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::commit::CommitRef;

/// Author and subject of the checked-out commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetails {
    /// `Name <email>` of the commit author.
    pub author: String,
    /// First line of the commit message.
    pub comment: String,
}

/// Errors from the repository fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {op} failed: {detail}")]
    Command { op: &'static str, detail: String },

    #[error("Invalid commit details: {raw}")]
    InvalidDetails { raw: String },
}

/// Materializes commits on disk and answers questions about them.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Clone the commit's branch into `dest` and check out its sha.
    async fn clone_commit(&self, commit: &CommitRef, dest: &Path) -> Result<(), FetchError>;

    /// Read author and commit subject for the HEAD of `checkout`.
    async fn read_commit_details(&self, checkout: &Path) -> Result<CommitDetails, FetchError>;
}

/// Fetcher that shells out to the system `git`.
#[derive(Debug, Default)]
pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }

    async fn git(
        &self,
        op: &'static str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<String, FetchError> {
        let mut command = Command::new("git");
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        debug!(op, ?args, "running git");
        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::Command { op, detail: stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn clone_commit(&self, commit: &CommitRef, dest: &Path) -> Result<(), FetchError> {
        let dest_str = dest.display().to_string();
        self.git(
            "clone",
            &[
                "clone",
                "--quiet",
                "--branch",
                &commit.branch,
                &commit.repo_url,
                &dest_str,
            ],
            None,
        )
        .await?;
        // The branch tip may have moved past the commit we were asked
        // to test; pin the work tree to the exact sha.
        self.git("checkout", &["checkout", "--quiet", &commit.sha], Some(dest))
            .await?;
        Ok(())
    }

    async fn read_commit_details(&self, checkout: &Path) -> Result<CommitDetails, FetchError> {
        let raw = self
            .git(
                "show",
                &["show", "--no-patch", "--format=%aN <%aE>:::%s", "HEAD"],
                Some(checkout),
            )
            .await?;
        parse_commit_details(&raw)
    }
}

/// Split `author:::subject` output into its two fields.
fn parse_commit_details(raw: &str) -> Result<CommitDetails, FetchError> {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, ":::");
    match (parts.next(), parts.next()) {
        (Some(author), Some(comment)) if !author.trim().is_empty() => Ok(CommitDetails {
            author: author.trim().to_string(),
            comment: comment.trim().to_string(),
        }),
        _ => Err(FetchError::InvalidDetails {
            raw: trimmed.to_string(),
        }),
    }
}
