//! poolscaled — runs the poolscale controller as a daemon.
//!
//! The binary wires a [`SnapshotLister`] per node group into a
//! [`Controller`](poolscale_controller::Controller) and optionally serves
//! `/metrics` and `/healthz` over HTTP.

pub mod server;
pub mod snapshot;

pub use server::build_router;
pub use snapshot::{ClusterSnapshot, SnapshotLister};
