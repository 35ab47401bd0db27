//! Metrics registry holding the last observed gauges of every node group.
//!
//! The control loop is the only writer; the `/metrics` handler reads
//! through [`MetricsRegistry::snapshot`]. A gauge stays `None` until the
//! group's cycle gets far enough to emit it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use poolscale_core::ResourceTotals;

/// Last emitted values for one node group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeGroupGauges {
    pub nodes: Option<usize>,
    pub tainted_nodes: Option<usize>,
    pub untainted_nodes: Option<usize>,
    pub pods: Option<usize>,
    pub cpu_request_milli: Option<u64>,
    pub cpu_capacity_milli: Option<u64>,
    pub memory_request_bytes: Option<u64>,
    pub memory_capacity_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub nodes_delta: Option<i64>,
    pub nodes_affected: Option<usize>,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub node_groups: Vec<(String, NodeGroupGauges)>,
    pub sweeps_total: u64,
    pub last_sweep_duration: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    node_groups: BTreeMap<String, NodeGroupGauges>,
    sweeps_total: u64,
    last_sweep_duration: Option<Duration>,
}

/// Shared, cheaply cloneable gauge registry.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, node_group: &str, f: impl FnOnce(&mut NodeGroupGauges)) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let gauges = inner
            .node_groups
            .entry(node_group.to_string())
            .or_insert_with(|| {
                debug!(%node_group, "registered node group metrics");
                NodeGroupGauges::default()
            });
        f(gauges);
    }

    pub fn record_node_counts(
        &self,
        node_group: &str,
        nodes: usize,
        tainted: usize,
        untainted: usize,
        pods: usize,
    ) {
        self.update(node_group, |g| {
            g.nodes = Some(nodes);
            g.tainted_nodes = Some(tainted);
            g.untainted_nodes = Some(untainted);
            g.pods = Some(pods);
        });
    }

    /// Record aggregated requests and capacity (CPU in milli-cores, memory in bytes).
    pub fn record_resources(
        &self,
        node_group: &str,
        requests: &ResourceTotals,
        capacity: &ResourceTotals,
    ) {
        self.update(node_group, |g| {
            g.cpu_request_milli = Some(requests.cpu_milli);
            g.cpu_capacity_milli = Some(capacity.cpu_milli);
            g.memory_request_bytes = Some(requests.memory_bytes());
            g.memory_capacity_bytes = Some(capacity.memory_bytes());
        });
    }

    pub fn record_usage(&self, node_group: &str, cpu_percent: f64, memory_percent: f64) {
        self.update(node_group, |g| {
            g.cpu_percent = Some(cpu_percent);
            g.memory_percent = Some(memory_percent);
        });
    }

    pub fn record_delta(&self, node_group: &str, delta: i64) {
        self.update(node_group, |g| g.nodes_delta = Some(delta));
    }

    pub fn record_affected(&self, node_group: &str, affected: usize) {
        self.update(node_group, |g| g.nodes_affected = Some(affected));
    }

    /// Count a finished sweep and remember how long it took.
    pub fn record_sweep(&self, duration: Duration) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sweeps_total += 1;
        inner.last_sweep_duration = Some(duration);
    }

    /// Gauges of one node group, if it has emitted anything yet.
    pub fn node_group(&self, node_group: &str) -> Option<NodeGroupGauges> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.node_groups.get(node_group).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            node_groups: inner
                .node_groups
                .iter()
                .map(|(name, gauges)| (name.clone(), gauges.clone()))
                .collect(),
            sweeps_total: inner.sweeps_total,
            last_sweep_duration: inner.last_sweep_duration,
        }
    }
}
