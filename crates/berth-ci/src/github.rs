//! GitHub commit-status sink.
//!
//! Posts run progress to the commit statuses API so the commit page
//! shows pending/success/error/failure alongside the run's message.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::commit::CommitRef;
use crate::status::{CommitState, StatusError, StatusSink};

/// GitHub limits status descriptions to 140 characters.
const MAX_DESCRIPTION: usize = 140;

/// GitHub status sink configuration.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// API root, e.g. `https://api.github.com`.
    pub api_root: String,
    /// OAuth token with `repo:status` scope.
    pub token: String,
    /// Status context label shown next to the state.
    pub context: String,
}

impl GithubConfig {
    pub fn new(token: impl Into<String>) -> Self {
        GithubConfig {
            api_root: "https://api.github.com".to_string(),
            token: token.into(),
            context: "berth".to_string(),
        }
    }
}

#[derive(Serialize)]
struct StatusBody<'a> {
    state: &'a str,
    description: &'a str,
    context: &'a str,
}

/// Status sink backed by the GitHub commit statuses API.
pub struct GithubStatusSink {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubStatusSink {
    pub fn new(config: GithubConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("berth-ci/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");

        GithubStatusSink {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl StatusSink for GithubStatusSink {
    async fn set_status(
        &self,
        commit: &CommitRef,
        state: CommitState,
        text: &str,
    ) -> Result<(), StatusError> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.config.api_root, commit.owner, commit.repo, commit.sha
        );
        let description = truncate(text, MAX_DESCRIPTION);
        debug!(commit = %commit, state = %state, "posting commit status");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&StatusBody {
                state: state.as_str(),
                description,
                context: &self.config.context,
            })
            .send()
            .await
            .map_err(|e| StatusError(format!("status post failed: {e}")))?;

        if !response.status().is_success() {
            return Err(StatusError(format!(
                "status post rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
