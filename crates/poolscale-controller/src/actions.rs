//! Pool mutation operations and the context handed to them.
//!
//! The decision engine only picks *which* operation runs; how many nodes
//! are actually tainted, revived or terminated, and whether the group's
//! bounds allow it, is up to the [`ScaleActions`] implementation.

use std::collections::HashSet;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use poolscale_core::{Node, NodeGroupConfig, Pod};

use crate::state::TaintTracker;

/// Everything known about a node group for the current cycle.
///
/// Built fresh for every group evaluation and dropped when it ends.
pub struct ScalingCycleContext<'a> {
    pub nodes: Vec<Node>,
    pub tainted_nodes: Vec<Node>,
    pub untainted_nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub config: &'a NodeGroupConfig,
    /// Simulated taints; mutated only by dry-run operations.
    pub taint_tracker: &'a mut TaintTracker,
    pub cluster_usage_percent: u32,
    pub nodes_delta: i64,
}

/// A failed mutation, with the number of nodes it affected before failing.
#[derive(Debug, Error)]
#[error("{source:#}")]
pub struct ActionError {
    pub affected: usize,
    pub source: anyhow::Error,
}

impl ActionError {
    pub fn partial(affected: usize, source: anyhow::Error) -> Self {
        Self { affected, source }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(source: anyhow::Error) -> Self {
        Self::partial(0, source)
    }
}

pub type ActionResult = Result<usize, ActionError>;

/// Operations that change the size of a node pool.
///
/// Each returns the number of nodes it affected.
pub trait ScaleActions: Send + Sync {
    /// Mark up to `nodes` untainted nodes for removal.
    fn scale_down(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult;

    /// Add `nodes` worth of capacity, reviving tainted nodes before
    /// provisioning new ones.
    fn scale_up(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult;

    /// Move already tainted nodes toward termination.
    fn reap_tainted(&self, ctx: &mut ScalingCycleContext<'_>) -> ActionResult;
}

/// Dry-run operations: taints live only in the group's [`TaintTracker`]
/// and nothing in the cluster is touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedActions;

impl ScaleActions for SimulatedActions {
    fn scale_down(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult {
        let node_group = ctx.config.name.as_str();
        let removable = ctx.untainted_nodes.len().saturating_sub(ctx.config.min_nodes);
        let count = nodes.min(removable);
        if count == 0 {
            info!(%node_group, min_nodes = ctx.config.min_nodes, "untainted nodes already at minimum");
            return Ok(0);
        }

        let mut candidates: Vec<&Node> = ctx.untainted_nodes.iter().collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));

        let now = Instant::now();
        for node in candidates.into_iter().take(count) {
            ctx.taint_tracker.taint(&node.name, now);
            info!(%node_group, node = %node.name, "dry-run: tainted node");
        }
        Ok(count)
    }

    fn scale_up(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult {
        let node_group = ctx.config.name.as_str();

        let mut revivable: Vec<&Node> = ctx.tainted_nodes.iter().collect();
        revivable.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));

        let revived = nodes.min(revivable.len());
        for node in revivable.into_iter().take(revived) {
            ctx.taint_tracker.untaint(&node.name);
            info!(%node_group, node = %node.name, "dry-run: untainted node");
        }

        let remaining = nodes - revived;
        let headroom = ctx.config.max_nodes.saturating_sub(ctx.nodes.len());
        let provisioned = remaining.min(headroom);
        if provisioned > 0 {
            info!(%node_group, nodes = provisioned, "dry-run: would provision nodes");
        }
        if provisioned < remaining {
            warn!(
                %node_group,
                requested = remaining,
                max_nodes = ctx.config.max_nodes,
                "scale up limited by max_nodes"
            );
        }
        Ok(revived + provisioned)
    }

    fn reap_tainted(&self, ctx: &mut ScalingCycleContext<'_>) -> ActionResult {
        let node_group = ctx.config.name.as_str();

        let listed: HashSet<&str> = ctx.nodes.iter().map(|n| n.name.as_str()).collect();
        ctx.taint_tracker.retain(|name| listed.contains(name));

        let grace = ctx.config.reap_grace_period;
        let mut terminable = 0;
        for node in &ctx.tainted_nodes {
            if let Some(tainted_at) = ctx.taint_tracker.tainted_at(&node.name)
                && tainted_at.elapsed() >= grace
            {
                info!(%node_group, node = %node.name, "dry-run: would terminate node");
                terminable += 1;
            }
        }
        Ok(terminable)
    }
}
