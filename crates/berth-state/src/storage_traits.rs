//! Storage trait definitions for the run trace
//!
//! A trace is a tree of timed entries. Each run owns one root scope;
//! `group`-style entries own a child scope of their own. The store is
//! append-only apart from `set_duration`, which closes out a group
//! entry exactly once.
//!
//! The trait is async and backend-agnostic. An in-memory fake is
//! provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Opaque address of one scope or entry in a trace.
///
/// The root handle of a run addresses the run's whole trace; the handle
/// returned by [`TraceStore::append`] addresses the appended entry and,
/// for group entries, doubles as the scope handle for its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceHandle(String);

impl TraceHandle {
    /// Root handle for the run identified by `key` (e.g. `owner/repo/sha`).
    pub fn for_run(key: &str) -> Self {
        TraceHandle(format!("runs/{key}"))
    }

    /// Child handle at the given position under this handle.
    ///
    /// Stores are free to mint handles however they like; this scheme
    /// keeps them readable and collision-free within one trace.
    pub fn child(&self, index: usize) -> Self {
        TraceHandle(format!("{}/{index}", self.0))
    }

    /// Return the handle's path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rendering style of a trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStyle {
    Info,
    Group,
    Error,
}

/// A single entry in a run trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Seconds since run start when the entry was written
    pub delta: f64,
    /// Formatted message line
    pub line: String,
    /// Rendering style
    pub style: EntryStyle,
}

/// Append-only hierarchical trace store.
///
/// Guarantees:
/// - Entries within a scope are ordered by append order.
/// - An entry's children are never observable before the entry itself.
/// - `set_duration` succeeds at most once per group entry.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Drop any pre-existing trace under `root` and start it fresh.
    async fn clear(&self, root: &TraceHandle) -> StorageResult<()>;

    /// Append an entry to the given scope, returning the new entry's handle.
    ///
    /// For `Group`-style entries the returned handle is also the scope
    /// handle for the group's children.
    async fn append(&self, scope: &TraceHandle, entry: TraceEntry) -> StorageResult<TraceHandle>;

    /// Record the elapsed duration of a closed group entry, in seconds.
    async fn set_duration(&self, entry: &TraceHandle, seconds: f64) -> StorageResult<()>;
}
