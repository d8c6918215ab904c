//! Dependency installer: resolves the package manifest and installs the
//! commit's declared dependencies via the package manager subprocess.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// The one thing the pipeline needs from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: String,
}

/// Errors from manifest resolution.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("package name is required")]
    MissingName,
}

/// Errors from the install subprocess.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with code {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Resolves manifests and installs dependencies for a checked-out tree.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Read the manifest at `path` and extract the declared package name.
    async fn resolve_manifest(&self, path: &Path) -> Result<PackageManifest, ManifestError>;

    /// Install dependencies for the package rooted at `root`.
    async fn install(&self, root: &Path) -> Result<(), InstallError>;
}

/// Installer that shells out to `bower`.
#[derive(Debug, Clone)]
pub struct BowerInstaller {
    command: String,
}

impl BowerInstaller {
    pub fn new() -> Self {
        Self {
            command: "bower".to_string(),
        }
    }

    /// Use a different executable (tests point this at a stub).
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for BowerInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DependencyInstaller for BowerInstaller {
    async fn resolve_manifest(&self, path: &Path) -> Result<PackageManifest, ManifestError> {
        let data = tokio::fs::read(path).await?;
        let value: serde_json::Value = serde_json::from_slice(&data)?;
        // A missing or non-string name is the same defect either way.
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or(ManifestError::MissingName)?;
        Ok(PackageManifest {
            name: name.to_string(),
        })
    }

    async fn install(&self, root: &Path) -> Result<(), InstallError> {
        debug!(command = %self.command, root = %root.display(), "installing dependencies");
        let output = Command::new(&self.command)
            .args(["install", "--allow-root"])
            .current_dir(root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(InstallError::Exit {
                command: self.command.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(
            stdout_bytes = output.stdout.len(),
            "dependency install finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn resolve(json: &str) -> Result<PackageManifest, ManifestError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bower.json");
        tokio::fs::write(&path, json).await.unwrap();
        BowerInstaller::new().resolve_manifest(&path).await
    }

    #[tokio::test]
    async fn resolve_extracts_the_package_name() {
        let manifest = resolve(r#"{"name": "observe-js", "main": "src/observe.js"}"#)
            .await
            .unwrap();
        assert_eq!(manifest.name, "observe-js");
    }

    #[tokio::test]
    async fn resolve_requires_a_string_name() {
        assert!(matches!(
            resolve(r#"{"main": "src/observe.js"}"#).await,
            Err(ManifestError::MissingName)
        ));
        assert!(matches!(
            resolve(r#"{"name": 42}"#).await,
            Err(ManifestError::MissingName)
        ));
    }

    #[tokio::test]
    async fn resolve_surfaces_parse_failures() {
        assert!(matches!(
            resolve("not json at all").await,
            Err(ManifestError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn resolve_surfaces_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = BowerInstaller::new()
            .resolve_manifest(&dir.path().join("bower.json"))
            .await;
        assert!(matches!(result, Err(ManifestError::Read(_))));
    }

    #[tokio::test]
    async fn install_maps_nonzero_exit_to_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let installer = BowerInstaller::with_command("false");
        match installer.install(dir.path()).await {
            Err(InstallError::Exit { code, .. }) => assert_ne!(code, 0),
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn install_maps_spawn_failure_to_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let installer = BowerInstaller::with_command("/nonexistent-package-manager");
        assert!(matches!(
            installer.install(dir.path()).await,
            Err(InstallError::Spawn { .. })
        ));
    }
}
