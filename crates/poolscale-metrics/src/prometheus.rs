//! Prometheus text exposition format.
//!
//! Renders a [`MetricsSnapshot`] for scraping. Every per-group series
//! carries a `node_group` label; groups that have not emitted a gauge yet
//! are skipped for that family.

use crate::registry::{MetricsSnapshot, NodeGroupGauges};

/// Render a metrics snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let families: [(&str, &str, fn(&NodeGroupGauges) -> Option<String>); 12] = [
        ("poolscale_node_group_nodes", "Nodes in the node group.", |g| {
            g.nodes.map(|v| v.to_string())
        }),
        (
            "poolscale_node_group_tainted_nodes",
            "Nodes marked for removal.",
            |g| g.tainted_nodes.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_untainted_nodes",
            "Nodes available for scheduling.",
            |g| g.untainted_nodes.map(|v| v.to_string()),
        ),
        ("poolscale_node_group_pods", "Pods counted toward demand.", |g| {
            g.pods.map(|v| v.to_string())
        }),
        (
            "poolscale_node_group_cpu_request_millicores",
            "Summed pod CPU requests.",
            |g| g.cpu_request_milli.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_cpu_capacity_millicores",
            "Summed CPU capacity of untainted nodes.",
            |g| g.cpu_capacity_milli.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_memory_request_bytes",
            "Summed pod memory requests.",
            |g| g.memory_request_bytes.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_memory_capacity_bytes",
            "Summed memory capacity of untainted nodes.",
            |g| g.memory_capacity_bytes.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_cpu_percent",
            "CPU requests as a percentage of capacity.",
            |g| g.cpu_percent.map(|v| format!("{v:.2}")),
        ),
        (
            "poolscale_node_group_memory_percent",
            "Memory requests as a percentage of capacity.",
            |g| g.memory_percent.map(|v| format!("{v:.2}")),
        ),
        (
            "poolscale_node_group_nodes_delta",
            "Signed node delta chosen by the last cycle.",
            |g| g.nodes_delta.map(|v| v.to_string()),
        ),
        (
            "poolscale_node_group_nodes_affected",
            "Nodes affected by the last scaling action.",
            |g| g.nodes_affected.map(|v| v.to_string()),
        ),
    ];

    let labels: Vec<String> = snapshot
        .node_groups
        .iter()
        .map(|(group, _)| escape_label_value(group))
        .collect();

    for (name, help, value) in families {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} gauge\n"));
        for (group, (_, gauges)) in labels.iter().zip(&snapshot.node_groups) {
            if let Some(v) = value(gauges) {
                out.push_str(&format!("{name}{{node_group=\"{group}\"}} {v}\n"));
            }
        }
    }

    out.push_str("# HELP poolscale_sweeps_total Completed sweeps over all node groups.\n");
    out.push_str("# TYPE poolscale_sweeps_total counter\n");
    out.push_str(&format!("poolscale_sweeps_total {}\n", snapshot.sweeps_total));

    if let Some(duration) = snapshot.last_sweep_duration {
        out.push_str("# HELP poolscale_last_sweep_seconds Duration of the last sweep.\n");
        out.push_str("# TYPE poolscale_last_sweep_seconds gauge\n");
        out.push_str(&format!(
            "poolscale_last_sweep_seconds {:.6}\n",
            duration.as_secs_f64()
        ));
    }

    out
}

/// Escape a label value for the text exposition format.
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
