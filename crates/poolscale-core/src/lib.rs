//! poolscale-core — shared types for the poolscale node-pool autoscaler.
//!
//! - [`types`]: the slice of the Kubernetes object model the controller
//!   reads (nodes, pods, taints).
//! - [`resources`]: resource quantity parsing and request/capacity
//!   aggregation in milli-units.
//! - [`config`]: `poolscale.toml` parsing and validation.

pub mod config;
pub mod resources;
pub mod types;

pub use config::{ConfigError, NodeGroupConfig, PoolscaleConfig, parse_duration};
pub use resources::{
    Quantity, QuantityError, ResourceError, ResourceTotals, total_node_capacity,
    total_pod_requests,
};
pub use types::*;
