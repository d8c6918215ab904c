//! Worker configuration: the runner allow-list and the credentials
//! handed to test-runner plugins.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors loading configuration from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration for a test-run worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub service: ServiceCredentials,
}

impl RunnerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Allow a runner name (test convenience).
    pub fn with_runner(mut self, name: impl Into<String>) -> Self {
        self.worker.valid_runners.push(name.into());
        self
    }
}

/// Worker-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Test runners a commit's metadata may name. Anything else is
    /// rejected before install or execution.
    #[serde(default)]
    pub valid_runners: Vec<String>,
}

/// Credentials for the hosted browser service passed through to
/// test-runner plugins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub tunnel_id: String,
}
