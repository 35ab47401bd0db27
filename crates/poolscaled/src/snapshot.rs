//! Snapshot-file lister.
//!
//! Reads a JSON dump of the cluster (`{ "nodes": [...], "pods": [...] }`)
//! once per cycle, so edits to the file show up on the next sweep.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use poolscale_controller::NodeGroupLister;
use poolscale_core::{Node, NodeGroupConfig, Pod};

/// Every node and pod in the cluster at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

impl ClusterSnapshot {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    /// Nodes labelled `key=value`.
    pub fn group_nodes(&self, key: &str, value: &str) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|node| node.has_label(key, value))
            .cloned()
            .collect()
    }

    /// Live pods that select `key=value` or run on one of the group's nodes.
    pub fn group_pods(&self, key: &str, value: &str) -> Vec<Pod> {
        let group_nodes: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|node| node.has_label(key, value))
            .map(|node| node.name.as_str())
            .collect();

        self.pods
            .iter()
            .filter(|pod| !pod.is_terminated())
            .filter(|pod| {
                pod.selects(key, value)
                    || pod
                        .node_name
                        .as_deref()
                        .is_some_and(|node| group_nodes.contains(node))
            })
            .cloned()
            .collect()
    }
}

/// Lists one node group's objects out of a snapshot file.
///
/// The cycle lists pods first: that call loads the file and keeps the
/// snapshot for the `list_nodes` call that follows, so both halves of a
/// cycle come from the same read. A `list_nodes` without a preceding
/// `list_pods` loads the file itself.
#[derive(Debug)]
pub struct SnapshotLister {
    path: PathBuf,
    label_key: String,
    label_value: String,
    pending: Mutex<Option<ClusterSnapshot>>,
}

impl SnapshotLister {
    pub fn new(path: impl Into<PathBuf>, group: &NodeGroupConfig) -> Self {
        Self {
            path: path.into(),
            label_key: group.label_key.clone(),
            label_value: group.label_value.clone(),
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<ClusterSnapshot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeGroupLister for SnapshotLister {
    fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        let mut pending = self.pending();
        // Never leave a stale snapshot for list_nodes.
        *pending = None;
        let snapshot = ClusterSnapshot::load(&self.path)?;
        let pods = snapshot.group_pods(&self.label_key, &self.label_value);
        *pending = Some(snapshot);
        Ok(pods)
    }

    fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let cached = self.pending().take();
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => ClusterSnapshot::load(&self.path)?,
        };
        Ok(snapshot.group_nodes(&self.label_key, &self.label_value))
    }
}
