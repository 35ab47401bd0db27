//! Per node group state that lives for the whole process.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use poolscale_core::{Node, NodeGroupConfig, Pod};

/// Lists the current nodes and pods of one node group.
///
/// Implementations are expected to serve from a local cache; the
/// controller calls them synchronously once per cycle.
pub trait NodeGroupLister: Send + Sync {
    fn list_pods(&self) -> anyhow::Result<Vec<Pod>>;
    fn list_nodes(&self) -> anyhow::Result<Vec<Node>>;
}

/// Lister over a fixed set of objects that can be swapped between sweeps.
#[derive(Default)]
pub struct InMemoryLister {
    objects: RwLock<(Vec<Node>, Vec<Pod>)>,
}

impl InMemoryLister {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        Self {
            objects: RwLock::new((nodes, pods)),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.objects.write().unwrap_or_else(PoisonError::into_inner).0 = nodes;
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        self.objects.write().unwrap_or_else(PoisonError::into_inner).1 = pods;
    }
}

impl NodeGroupLister for InMemoryLister {
    fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        Ok(self.objects.read().unwrap_or_else(PoisonError::into_inner).1.clone())
    }

    fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        Ok(self.objects.read().unwrap_or_else(PoisonError::into_inner).0.clone())
    }
}

/// Nodes considered tainted while running in dry-run, with the instant
/// each was tainted.
#[derive(Debug, Clone, Default)]
pub struct TaintTracker {
    tainted: BTreeMap<String, Instant>,
}

impl TaintTracker {
    pub fn contains(&self, node: &str) -> bool {
        self.tainted.contains_key(node)
    }

    /// Returns `false` if the node was already tracked; its taint time is kept.
    pub fn taint(&mut self, node: &str, at: Instant) -> bool {
        if self.tainted.contains_key(node) {
            return false;
        }
        self.tainted.insert(node.to_string(), at);
        true
    }

    pub fn untaint(&mut self, node: &str) -> bool {
        self.tainted.remove(node).is_some()
    }

    pub fn tainted_at(&self, node: &str) -> Option<Instant> {
        self.tainted.get(node).copied()
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.tainted.retain(|name, _| keep(name));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tainted.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tainted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tainted.is_empty()
    }
}

/// Everything the controller keeps about one node group.
pub struct NodeGroupState {
    pub(crate) config: NodeGroupConfig,
    pub(crate) lister: Arc<dyn NodeGroupLister>,
    pub(crate) taint_tracker: TaintTracker,
}

impl NodeGroupState {
    pub fn new(config: NodeGroupConfig, lister: Arc<dyn NodeGroupLister>) -> Self {
        Self {
            config,
            lister,
            taint_tracker: TaintTracker::default(),
        }
    }

    pub fn config(&self) -> &NodeGroupConfig {
        &self.config
    }

    /// Simulated taints; only meaningful while the group runs in dry-run.
    pub fn taint_tracker(&self) -> &TaintTracker {
        &self.taint_tracker
    }
}

/// Split `nodes` into `(tainted, untainted)`.
///
/// In dry-run only the tracker decides; otherwise only the node's
/// to-be-removed taint does.
pub fn partition_nodes(
    nodes: &[Node],
    dry_run: bool,
    tracker: &TaintTracker,
) -> (Vec<Node>, Vec<Node>) {
    nodes.iter().cloned().partition(|node| {
        if dry_run {
            tracker.contains(&node.name)
        } else {
            node.is_marked_for_removal()
        }
    })
}
