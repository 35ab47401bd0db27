//! poolscale-metrics — observability for node group scaling.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── record_*() ← called by the decision engine per cycle
//!   ├── record_sweep() ← called by the control loop per sweep
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod registry;

pub use prometheus::render_prometheus;
pub use registry::{MetricsRegistry, MetricsSnapshot, NodeGroupGauges};
