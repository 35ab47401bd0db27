//! Scaling decision engine: one pass over one node group.
//!
//! # Cycle
//!
//! ```text
//! list pods, nodes
//! partition nodes into tainted / untainted
//! bounds guard        (0 nodes, n < min, n > max  → skip)
//! aggregate           requests(all pods), capacity(untainted nodes)
//! usage = max(cpu%, mem%)
//!
//! usage < taint_lower   → delta = -fast_removal_rate
//! usage < taint_upper   → delta = -slow_removal_rate
//! usage > scale_up      → delta = +fast_revival_rate
//! otherwise             → delta = 0
//!
//! delta < 0 → scale_down(|delta|)
//! delta > 0 → scale_up(delta)
//! delta = 0 → reap_tainted()
//! ```

use std::cmp::Ordering;

use tracing::{debug, info};

use poolscale_core::{NodeGroupConfig, ResourceTotals, total_node_capacity, total_pod_requests};
use poolscale_metrics::MetricsRegistry;

use crate::actions::{ScaleActions, ScalingCycleContext};
use crate::error::CycleError;
use crate::state::{NodeGroupState, partition_nodes};

/// The policy branch selected for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Deeply under-utilized: remove nodes at the fast rate.
    FastRemoval(usize),
    /// Mildly under-utilized: remove nodes at the slow rate.
    SlowRemoval(usize),
    /// Under pressure: add nodes at the revival rate.
    FastRevival(usize),
    /// No threshold crossed.
    Hold,
}

impl Decision {
    /// Signed change in node count.
    pub fn delta(&self) -> i64 {
        match *self {
            Decision::FastRemoval(n) | Decision::SlowRemoval(n) => -(n as i64),
            Decision::FastRevival(n) => n as i64,
            Decision::Hold => 0,
        }
    }
}

/// Pick the policy branch for `usage`. The first matching rule wins.
pub fn select_decision(usage: u32, config: &NodeGroupConfig) -> Decision {
    if usage < config.taint_lower_threshold_percent {
        Decision::FastRemoval(config.fast_removal_rate)
    } else if usage < config.taint_upper_threshold_percent {
        Decision::SlowRemoval(config.slow_removal_rate)
    } else if usage > config.scale_up_threshold_percent {
        Decision::FastRevival(config.fast_revival_rate)
    } else {
        Decision::Hold
    }
}

/// CPU and memory requests as percentages of capacity.
pub fn calc_percent_usage(
    requests: &ResourceTotals,
    capacity: &ResourceTotals,
) -> Result<(f64, f64), CycleError> {
    if capacity.cpu_milli == 0 || capacity.memory_milli == 0 {
        return Err(CycleError::ZeroCapacity);
    }
    let cpu = requests.cpu_milli as f64 / capacity.cpu_milli as f64 * 100.0;
    let memory = requests.memory_milli as f64 / capacity.memory_milli as f64 * 100.0;
    Ok((cpu, memory))
}

/// The tighter of the two dimensions, truncated to a whole percent.
pub fn cluster_usage(cpu_percent: f64, memory_percent: f64) -> u32 {
    cpu_percent.max(memory_percent) as u32
}

/// Summary of a cycle that reached dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub nodes: usize,
    pub tainted_nodes: usize,
    pub untainted_nodes: usize,
    pub pods: usize,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub usage_percent: u32,
    pub decision: Decision,
    pub nodes_affected: usize,
}

/// Run one decision cycle for `state`.
///
/// `actions` must already be the dry-run implementation when `dry_run` is set.
pub(crate) fn scale_node_group(
    state: &mut NodeGroupState,
    dry_run: bool,
    actions: &dyn ScaleActions,
    metrics: &MetricsRegistry,
) -> Result<CycleReport, CycleError> {
    let config = &state.config;
    let node_group = config.name.as_str();

    let pods = state.lister.list_pods().map_err(CycleError::ListPods)?;
    let nodes = state.lister.list_nodes().map_err(CycleError::ListNodes)?;

    let (tainted, untainted) = partition_nodes(&nodes, dry_run, &state.taint_tracker);

    info!(
        %node_group,
        nodes = nodes.len(),
        untainted = untainted.len(),
        tainted = tainted.len(),
        pods = pods.len(),
        "nodes remaining"
    );
    metrics.record_node_counts(node_group, nodes.len(), tainted.len(), untainted.len(), pods.len());

    // Out-of-bounds groups are left for an operator; nothing is corrected here.
    if nodes.is_empty() {
        return Err(CycleError::NoNodes);
    }
    if nodes.len() < config.min_nodes {
        return Err(CycleError::BelowMinimum {
            nodes: nodes.len(),
            min: config.min_nodes,
        });
    }
    if nodes.len() > config.max_nodes {
        return Err(CycleError::AboveMaximum {
            nodes: nodes.len(),
            max: config.max_nodes,
        });
    }

    let requests = total_pod_requests(&pods)?;
    let capacity = total_node_capacity(&untainted)?;
    metrics.record_resources(node_group, &requests, &capacity);

    let (cpu_percent, memory_percent) = calc_percent_usage(&requests, &capacity)?;
    info!(%node_group, cpu = cpu_percent, memory = memory_percent, "usage percent");
    metrics.record_usage(node_group, cpu_percent, memory_percent);

    let usage = cluster_usage(cpu_percent, memory_percent);
    let decision = select_decision(usage, config);
    let delta = decision.delta();
    debug!(%node_group, usage, ?decision, delta, "scaling decision");
    metrics.record_delta(node_group, delta);

    let mut report = CycleReport {
        nodes: nodes.len(),
        tainted_nodes: tainted.len(),
        untainted_nodes: untainted.len(),
        pods: pods.len(),
        cpu_percent,
        memory_percent,
        usage_percent: usage,
        decision,
        nodes_affected: 0,
    };

    let mut ctx = ScalingCycleContext {
        nodes,
        tainted_nodes: tainted,
        untainted_nodes: untainted,
        pods,
        config,
        taint_tracker: &mut state.taint_tracker,
        cluster_usage_percent: usage,
        nodes_delta: delta,
    };

    let magnitude = delta.unsigned_abs() as usize;
    let (operation, result) = match delta.cmp(&0) {
        Ordering::Less => ("scale_down", actions.scale_down(&mut ctx, magnitude)),
        Ordering::Greater => ("scale_up", actions.scale_up(&mut ctx, magnitude)),
        Ordering::Equal => {
            info!(%node_group, "no need to scale");
            ("reap_tainted", actions.reap_tainted(&mut ctx))
        }
    };

    match result {
        Ok(affected) => {
            if operation == "reap_tainted" {
                info!(%node_group, removed = affected, "tainted nodes removed this round");
            }
            debug!(%node_group, operation, affected, "scaling action finished");
            metrics.record_affected(node_group, affected);
            report.nodes_affected = affected;
            Ok(report)
        }
        Err(source) => {
            metrics.record_affected(node_group, source.affected);
            Err(CycleError::Action { operation, source })
        }
    }
}
