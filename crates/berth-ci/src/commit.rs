//! Commit identity for a test run.

use console::style;
use serde::Deserialize;

use crate::error::ValidationError;

/// Immutable identity of the commit under test, plus the author details
/// filled in once the commit is checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    pub branch: String,

    /// `https://github.com/{owner}/{repo}`
    pub repo_url: String,
    /// `{owner}/{repo}/{sha}` — unique identity for a test run.
    pub key: String,

    /// Author name/email, read from the checkout.
    pub author: Option<String>,
    /// First line of the commit message, read from the checkout.
    pub comment: Option<String>,
}

impl CommitRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        sha: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let owner = owner.into();
        let repo = repo.into();
        let sha = sha.into();
        let branch = branch.into();
        for (field, value) in [
            ("owner", &owner),
            ("repo", &repo),
            ("sha", &sha),
            ("branch", &branch),
        ] {
            if value.is_empty() {
                return Err(ValidationError::MissingCommitField { field });
            }
        }

        let repo_url = format!("https://github.com/{owner}/{repo}");
        let key = format!("{owner}/{repo}/{sha}");
        Ok(CommitRef {
            owner,
            repo,
            sha,
            branch,
            repo_url,
            key,
            author: None,
            comment: None,
        })
    }

    /// Build a commit ref from a push-style webhook payload.
    ///
    /// The branch is the suffix of `ref` after `refs/heads/`; any other
    /// ref shape (tags, notes) fails validation.
    pub fn from_push_event(event: &PushEvent) -> Result<Self, ValidationError> {
        let branch = event
            .git_ref
            .strip_prefix("refs/heads/")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ValidationError::NotABranchRef {
                reference: event.git_ref.clone(),
            })?;
        Self::new(
            &event.repository.owner.name,
            &event.repository.name,
            &event.head_commit.id,
            branch,
        )
    }

    /// Build a commit ref from a pull-request-style webhook payload.
    pub fn from_pull_request_event(event: &PullRequestEvent) -> Result<Self, ValidationError> {
        let head = &event.pull_request.head;
        Self::new(&head.user.login, &head.repo.name, &head.sha, &head.branch)
    }

    /// Short human-readable form for the console trace:
    /// cyan `owner/repo` @ yellow abbreviated sha.
    pub fn display_label(&self) -> String {
        let short = &self.sha[..8.min(self.sha.len())];
        format!(
            "{}@{}",
            style(format!("{}/{}", self.owner, self.repo)).cyan(),
            style(short).yellow()
        )
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = &self.sha[..8.min(self.sha.len())];
        write!(f, "{}/{}@{short}", self.owner, self.repo)
    }
}

// ── Webhook payload shapes ────────────────────────────────────────────────

/// Push event body, as delivered by the forge's webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: PushRepository,
    pub head_commit: PushHeadCommit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub name: String,
    pub owner: PushRepositoryOwner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepositoryOwner {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushHeadCommit {
    pub id: String,
}

/// Pull request event body.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub pull_request: PullRequestDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDescriptor {
    pub head: PullRequestHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHead {
    pub sha: String,
    #[serde(rename = "ref")]
    pub branch: String,
    pub user: PullRequestUser,
    pub repo: PullRequestRepo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRepo {
    pub name: String,
}
