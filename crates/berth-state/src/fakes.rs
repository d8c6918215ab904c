//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryTraceStore`, which satisfies the `TraceStore`
//! contract without any external dependencies, plus read-side helpers
//! that tests use to assert on the recorded trace shape.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Node {
    /// `None` for the root scope of a run, `Some` for appended entries.
    entry: Option<TraceEntry>,
    children: Vec<TraceHandle>,
    duration: Option<f64>,
}

/// In-memory trace store backed by a `HashMap<handle, node>`.
#[derive(Debug, Default)]
pub struct MemoryTraceStore {
    nodes: Mutex<HashMap<TraceHandle, Node>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries directly under `scope`, in append order.
    pub fn entries(&self, scope: &TraceHandle) -> Vec<TraceEntry> {
        let nodes = self.nodes.lock().unwrap();
        let Some(node) = nodes.get(scope) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|h| nodes.get(h).and_then(|n| n.entry.clone()))
            .collect()
    }

    /// Handles of the entries directly under `scope`, in append order.
    pub fn children(&self, scope: &TraceHandle) -> Vec<TraceHandle> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(scope)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Recorded duration of the group entry at `handle`, if closed.
    pub fn duration(&self, handle: &TraceHandle) -> Option<f64> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(handle).and_then(|n| n.duration)
    }

    /// Full recursive snapshot of the trace under `root`.
    pub fn snapshot(&self, root: &TraceHandle) -> Option<TraceSnapshot> {
        let nodes = self.nodes.lock().unwrap();
        fn build(nodes: &HashMap<TraceHandle, Node>, handle: &TraceHandle) -> Option<TraceSnapshot> {
            let node = nodes.get(handle)?;
            Some(TraceSnapshot {
                entry: node.entry.clone(),
                duration: node.duration,
                children: node
                    .children
                    .iter()
                    .filter_map(|h| build(nodes, h))
                    .collect(),
            })
        }
        build(&nodes, root)
    }

    fn remove_subtree(nodes: &mut HashMap<TraceHandle, Node>, handle: &TraceHandle) {
        if let Some(node) = nodes.remove(handle) {
            for child in node.children {
                Self::remove_subtree(nodes, &child);
            }
        }
    }
}

/// Point-in-time copy of a trace subtree, for assertions and export.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSnapshot {
    pub entry: Option<TraceEntry>,
    pub duration: Option<f64>,
    pub children: Vec<TraceSnapshot>,
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn clear(&self, root: &TraceHandle) -> StorageResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        Self::remove_subtree(&mut nodes, root);
        nodes.insert(root.clone(), Node::default());
        Ok(())
    }

    async fn append(&self, scope: &TraceHandle, entry: TraceEntry) -> StorageResult<TraceHandle> {
        let mut nodes = self.nodes.lock().unwrap();
        let position = nodes
            .get(scope)
            .ok_or_else(|| StorageError::HandleNotFound {
                handle: scope.to_string(),
            })?
            .children
            .len();
        let handle = scope.child(position);
        nodes.insert(
            handle.clone(),
            Node {
                entry: Some(entry),
                children: Vec::new(),
                duration: None,
            },
        );
        nodes
            .get_mut(scope)
            .expect("scope checked above")
            .children
            .push(handle.clone());
        Ok(handle)
    }

    async fn set_duration(&self, entry: &TraceHandle, seconds: f64) -> StorageResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(entry)
            .ok_or_else(|| StorageError::HandleNotFound {
                handle: entry.to_string(),
            })?;
        match node.entry {
            Some(ref e) if e.style == EntryStyle::Group => {}
            _ => {
                return Err(StorageError::NotAGroup {
                    handle: entry.to_string(),
                })
            }
        }
        if node.duration.is_some() {
            return Err(StorageError::DurationAlreadySet {
                handle: entry.to_string(),
            });
        }
        node.duration = Some(seconds);
        Ok(())
    }
}
