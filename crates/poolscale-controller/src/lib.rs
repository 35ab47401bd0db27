//! poolscale-controller — node group scaling decisions.
//!
//! Every `scan_interval` the [`Controller`] evaluates each configured node
//! group once: it lists the group's nodes and pods, splits the nodes into
//! tainted (being removed) and untainted, compares pod requests with the
//! untainted capacity and picks exactly one action:
//!
//! | usage                       | action                              |
//! |-----------------------------|-------------------------------------|
//! | `< taint_lower_threshold`   | scale down by `fast_removal_rate`   |
//! | `< taint_upper_threshold`   | scale down by `slow_removal_rate`   |
//! | `> scale_up_threshold`      | scale up by `fast_revival_rate`     |
//! | otherwise                   | reap already tainted nodes          |
//!
//! Groups whose node count is zero or outside `[min_nodes, max_nodes]` are
//! skipped with a warning. In dry-run, taints are simulated in memory by
//! [`SimulatedActions`] and the real backend is never called.

pub mod actions;
pub mod controller;
pub mod engine;
pub mod error;
pub mod state;

pub use actions::{ActionError, ActionResult, ScaleActions, ScalingCycleContext, SimulatedActions};
pub use controller::{Controller, SweepReport};
pub use engine::{CycleReport, Decision, calc_percent_usage, cluster_usage, select_decision};
pub use error::{ControllerError, CycleError};
pub use state::{InMemoryLister, NodeGroupLister, NodeGroupState, TaintTracker, partition_nodes};
