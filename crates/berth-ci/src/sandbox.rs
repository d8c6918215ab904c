//! Sandbox directory helpers for a run's working tree.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// Allocate a fresh, uniquely-named sandbox directory.
///
/// The directory is retained on disk (not auto-deleted on drop) so the
/// run controls its own cleanup and the sandbox survives for
/// post-mortem inspection.
pub fn create_sandbox() -> io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix("berth-").tempdir()?;
    Ok(dir.into_path())
}

/// Resolve `name` against `root`, lexically, refusing anything that
/// would land outside `root` — or on `root` itself.
///
/// Package names come from the commit under test and must not be able
/// to address the filesystem above the sandbox.
pub fn resolve_inside(root: &Path, name: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if depth == 0 {
        return None;
    }
    Some(resolved)
}

/// Best-effort recursive removal of a run's working tree. Never fails:
/// a cleanup problem must not mask the run's real outcome.
pub async fn remove_tree(root: &Path) {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %root.display(), error = %err, "failed to remove working tree");
        }
    }
}
