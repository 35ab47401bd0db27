//! Controller error types.

use thiserror::Error;

use poolscale_core::{ConfigError, ResourceError};

use crate::actions::ActionError;

/// Why a node group's cycle stopped before completing.
///
/// Every variant is local to one group; the sweep moves on to the next.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to list pods: {0:#}")]
    ListPods(#[source] anyhow::Error),

    #[error("failed to list nodes: {0:#}")]
    ListNodes(#[source] anyhow::Error),

    #[error("no nodes remaining")]
    NoNodes,

    #[error("node count of {nodes} less than minimum of {min}")]
    BelowMinimum { nodes: usize, min: usize },

    #[error("node count of {nodes} larger than maximum of {max}")]
    AboveMaximum { nodes: usize, max: usize },

    #[error("failed to aggregate resources: {0}")]
    Aggregation(#[from] ResourceError),

    #[error("cannot divide by zero in percent calculation")]
    ZeroCapacity,

    #[error("no scale backend for a node group outside dry-run")]
    NoScaleBackend,

    #[error("{operation} failed after affecting {} nodes: {source}", .source.affected)]
    Action {
        operation: &'static str,
        source: ActionError,
    },
}

impl CycleError {
    /// Bounds anomalies: the group is left alone and the cycle is skipped
    /// without being treated as a failure.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            CycleError::NoNodes | CycleError::BelowMinimum { .. } | CycleError::AboveMaximum { .. }
        )
    }
}

/// Errors building a [`Controller`](crate::Controller).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no lister registered for node group {0}")]
    MissingLister(String),

    #[error("node group {0} is not in dry-run mode and no scale backend is configured")]
    NoScaleBackend(String),
}
