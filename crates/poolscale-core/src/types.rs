//! Cluster objects as seen by the autoscaler.
//!
//! These mirror the subset of the Kubernetes `Node` and `Pod` objects the
//! decision engine needs. Listers translate whatever backs them (a watch
//! cache, a snapshot file) into these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::Quantity;

/// Taint key placed on nodes that have been selected for removal.
pub const TO_BE_REMOVED_TAINT_KEY: &str = "poolscale.io/to-be-removed";

/// Resource name for CPU in request/capacity lists.
pub const RESOURCE_CPU: &str = "cpu";

/// Resource name for memory in request/capacity lists.
pub const RESOURCE_MEMORY: &str = "memory";

/// Resource name → quantity, as found in `requests` and `capacity`.
pub type ResourceList = BTreeMap<String, Quantity>;

// ── Node ───────────────────────────────────────────────────────────

/// A worker node belonging to a node group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Total resources of the node.
    #[serde(default)]
    pub capacity: ResourceList,
    /// Unix timestamp (seconds) when the node registered.
    #[serde(default)]
    pub created_at: u64,
}

impl Node {
    /// The to-be-removed taint, if the node carries one.
    pub fn to_be_removed_taint(&self) -> Option<&Taint> {
        self.taints
            .iter()
            .find(|t| t.key == TO_BE_REMOVED_TAINT_KEY)
    }

    /// Whether the node has been marked as a removal candidate.
    pub fn is_marked_for_removal(&self) -> bool {
        self.to_be_removed_taint().is_some()
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// A node taint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

// ── Pod ────────────────────────────────────────────────────────────

/// A pod whose requests count toward a node group's demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Node the pod is bound to; `None` while pending.
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub containers: Vec<Container>,
}

impl Pod {
    /// Terminated pods no longer hold on to their requests.
    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// Whether the pod's node selector requires `key=value`.
    pub fn selects(&self, key: &str, value: &str) -> bool {
        self.node_selector.get(key).is_some_and(|v| v == value)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
}
