//! Whole-sweep tests: listers, decision engine, dispatch and metrics together.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use poolscale_controller::*;
use poolscale_core::*;
use poolscale_metrics::MetricsRegistry;

const GROUP: &str = r#"
[[node_groups]]
name = "shared"
label_key = "pool"
label_value = "shared"
min_nodes = 1
max_nodes = 10
taint_lower_threshold_percent = 20
taint_upper_threshold_percent = 50
scale_up_threshold_percent = 80
fast_removal_rate = 3
slow_removal_rate = 1
fast_revival_rate = 2
"#;

/// Records every call and optionally fails after affecting some nodes.
#[derive(Default)]
struct RecordingActions {
    calls: Mutex<Vec<(&'static str, usize, i64)>>,
    fail_with_affected: Option<usize>,
}

impl RecordingActions {
    fn calls(&self) -> Vec<(&'static str, usize, i64)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, nodes: usize, ctx: &ScalingCycleContext<'_>) -> ActionResult {
        self.calls.lock().unwrap().push((op, nodes, ctx.nodes_delta));
        match self.fail_with_affected {
            Some(affected) => Err(ActionError::partial(affected, anyhow::anyhow!("{op} rejected"))),
            None => Ok(nodes),
        }
    }
}

impl ScaleActions for RecordingActions {
    fn scale_down(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult {
        self.record("scale_down", nodes, ctx)
    }

    fn scale_up(&self, ctx: &mut ScalingCycleContext<'_>, nodes: usize) -> ActionResult {
        self.record("scale_up", nodes, ctx)
    }

    fn reap_tainted(&self, ctx: &mut ScalingCycleContext<'_>) -> ActionResult {
        self.record("reap_tainted", 0, ctx)
    }
}

struct FailingLister;

impl NodeGroupLister for FailingLister {
    fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        anyhow::bail!("pod cache not synced")
    }

    fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        anyhow::bail!("node cache not synced")
    }
}

fn node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        labels: BTreeMap::from([("pool".to_string(), "shared".to_string())]),
        taints: vec![],
        capacity: BTreeMap::from([
            (RESOURCE_CPU.to_string(), Quantity::new("1")),
            (RESOURCE_MEMORY.to_string(), Quantity::new("1Gi")),
        ]),
        created_at: 0,
    }
}

fn marked(mut node: Node) -> Node {
    node.taints.push(Taint {
        key: TO_BE_REMOVED_TAINT_KEY.to_string(),
        value: None,
        effect: TaintEffect::NoSchedule,
    });
    node
}

fn nodes(count: usize) -> Vec<Node> {
    (0..count).map(|i| node(&format!("node-{i}"))).collect()
}

fn pod(cpu: &str, memory: &str) -> Pod {
    Pod {
        name: "workload".to_string(),
        namespace: "default".to_string(),
        node_name: None,
        node_selector: BTreeMap::new(),
        phase: PodPhase::Running,
        containers: vec![Container {
            name: "app".to_string(),
            requests: BTreeMap::from([
                (RESOURCE_CPU.to_string(), Quantity::new(cpu)),
                (RESOURCE_MEMORY.to_string(), Quantity::new(memory)),
            ]),
        }],
    }
}

struct Harness {
    controller: Controller,
    lister: Arc<InMemoryLister>,
    backend: Arc<RecordingActions>,
    metrics: MetricsRegistry,
}

fn harness_with(config: &PoolscaleConfig, nodes: Vec<Node>, pods: Vec<Pod>, backend: RecordingActions) -> Harness {
    let lister = Arc::new(InMemoryLister::new(nodes, pods));
    let backend = Arc::new(backend);
    let metrics = MetricsRegistry::new();

    let listers: HashMap<String, Arc<dyn NodeGroupLister>> =
        HashMap::from([("shared".to_string(), lister.clone() as Arc<dyn NodeGroupLister>)]);
    let controller = Controller::new(
        config,
        listers,
        Some(backend.clone() as Arc<dyn ScaleActions>),
        metrics.clone(),
    )
    .unwrap();

    Harness {
        controller,
        lister,
        backend,
        metrics,
    }
}

fn harness(nodes: Vec<Node>, pods: Vec<Pod>) -> Harness {
    let config = PoolscaleConfig::from_toml_str(GROUP).unwrap();
    harness_with(&config, nodes, pods, RecordingActions::default())
}

fn outcome(report: &SweepReport) -> &Result<CycleReport, CycleError> {
    report.get("shared").unwrap()
}

// 5 nodes: 5000m CPU and 5Gi (5120Mi) memory of capacity.

#[test]
fn high_cpu_scales_up() {
    let mut h = harness(nodes(5), vec![pod("4500m", "2048Mi")]);

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.usage_percent, 90);
    assert_eq!(cycle.decision, Decision::FastRevival(2));
    assert_eq!(h.backend.calls(), vec![("scale_up", 2, 2)]);
}

#[test]
fn very_low_usage_removes_fast() {
    let mut h = harness(nodes(5), vec![pod("500m", "256Mi")]);

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.usage_percent, 10);
    assert_eq!(cycle.decision, Decision::FastRemoval(3));
    assert_eq!(h.backend.calls(), vec![("scale_down", 3, -3)]);
}

#[test]
fn low_usage_removes_slowly() {
    let mut h = harness(nodes(5), vec![pod("1750m", "1536Mi")]);

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.usage_percent, 35);
    assert_eq!(cycle.decision, Decision::SlowRemoval(1));
    assert_eq!(h.backend.calls(), vec![("scale_down", 1, -1)]);
}

#[test]
fn steady_usage_only_reaps() {
    let mut h = harness(nodes(5), vec![pod("3000m", "2816Mi")]);

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.usage_percent, 60);
    assert_eq!(cycle.decision, Decision::Hold);
    assert_eq!(h.backend.calls(), vec![("reap_tainted", 0, 0)]);
}

#[test]
fn empty_group_is_skipped_without_percentages() {
    let mut h = harness(vec![], vec![pod("500m", "256Mi")]);

    let report = h.controller.run_once();

    assert!(matches!(outcome(&report), Err(CycleError::NoNodes)));
    assert!(h.backend.calls().is_empty());
    let gauges = h.metrics.node_group("shared").unwrap();
    assert_eq!(gauges.nodes, Some(0));
    assert!(gauges.cpu_request_milli.is_none());
    assert!(gauges.cpu_percent.is_none());
    assert!(gauges.memory_percent.is_none());
}

#[test]
fn group_above_max_is_skipped() {
    let mut h = harness(nodes(12), vec![pod("500m", "256Mi")]);

    let report = h.controller.run_once();

    assert!(matches!(
        outcome(&report),
        Err(CycleError::AboveMaximum { nodes: 12, max: 10 })
    ));
    assert!(h.backend.calls().is_empty());
}

#[test]
fn group_below_min_is_skipped() {
    let mut config = PoolscaleConfig::from_toml_str(GROUP).unwrap();
    config.node_groups[0].min_nodes = 6;
    let mut h = harness_with(&config, nodes(5), vec![pod("500m", "256Mi")], RecordingActions::default());

    let report = h.controller.run_once();

    assert!(matches!(
        outcome(&report),
        Err(CycleError::BelowMinimum { nodes: 5, min: 6 })
    ));
    assert!(h.backend.calls().is_empty());
}

#[test]
fn tainted_nodes_do_not_count_as_capacity() {
    let mut all = nodes(5);
    all[4] = marked(all[4].clone());
    // 3600m of 4000m untainted capacity is 90%.
    let mut h = harness(all, vec![pod("3600m", "1Gi")]);

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.tainted_nodes, 1);
    assert_eq!(cycle.untainted_nodes, 4);
    assert_eq!(cycle.usage_percent, 90);
    assert_eq!(h.backend.calls(), vec![("scale_up", 2, 2)]);

    let gauges = h.metrics.node_group("shared").unwrap();
    assert_eq!(gauges.cpu_capacity_milli, Some(4000));
    assert_eq!(gauges.tainted_nodes, Some(1));
}

#[test]
fn zero_capacity_aborts_without_action() {
    let all = nodes(3).into_iter().map(marked).collect();
    let mut h = harness(all, vec![]);

    let report = h.controller.run_once();

    assert!(matches!(outcome(&report), Err(CycleError::ZeroCapacity)));
    assert!(h.backend.calls().is_empty());
}

#[test]
fn malformed_quantity_aborts_without_action() {
    let mut h = harness(nodes(5), vec![pod("lots", "1Gi")]);

    let report = h.controller.run_once();

    assert!(matches!(outcome(&report), Err(CycleError::Aggregation(_))));
    assert!(h.backend.calls().is_empty());
}

#[test]
fn failed_action_still_reports_affected_nodes() {
    let config = PoolscaleConfig::from_toml_str(GROUP).unwrap();
    let backend = RecordingActions {
        fail_with_affected: Some(1),
        ..Default::default()
    };
    let mut h = harness_with(&config, nodes(5), vec![pod("500m", "256Mi")], backend);

    let report = h.controller.run_once();

    match outcome(&report) {
        Err(CycleError::Action { operation, source }) => {
            assert_eq!(*operation, "scale_down");
            assert_eq!(source.affected, 1);
        }
        other => panic!("expected action failure, got {other:?}"),
    }
    assert_eq!(h.backend.calls().len(), 1);
    assert_eq!(h.metrics.node_group("shared").unwrap().nodes_affected, Some(1));

    // The next sweep is the retry.
    h.controller.run_once();
    assert_eq!(h.backend.calls().len(), 2);
}

#[test]
fn one_failing_group_does_not_stop_the_sweep() {
    let doc = format!("{GROUP}\n{}", GROUP.replace("name = \"shared\"", "name = \"broken\""));
    let config = PoolscaleConfig::from_toml_str(&doc).unwrap();

    let healthy = Arc::new(InMemoryLister::new(nodes(5), vec![pod("4500m", "2048Mi")]));
    let listers: HashMap<String, Arc<dyn NodeGroupLister>> = HashMap::from([
        ("shared".to_string(), healthy as Arc<dyn NodeGroupLister>),
        ("broken".to_string(), Arc::new(FailingLister) as Arc<dyn NodeGroupLister>),
    ]);
    let backend = Arc::new(RecordingActions::default());
    let mut controller = Controller::new(
        &config,
        listers,
        Some(backend.clone() as Arc<dyn ScaleActions>),
        MetricsRegistry::new(),
    )
    .unwrap();

    let report = controller.run_once();

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(report.get("broken"), Some(Err(CycleError::ListPods(_)))));
    assert!(report.get("shared").unwrap().is_ok());
    assert_eq!(backend.calls(), vec![("scale_up", 2, 2)]);
}

#[test]
fn dry_run_never_calls_the_backend() {
    let mut config = PoolscaleConfig::from_toml_str(GROUP).unwrap();
    config.node_groups[0].dry_run = true;
    let mut h = harness_with(&config, nodes(5), vec![pod("500m", "256Mi")], RecordingActions::default());

    let report = h.controller.run_once();
    let cycle = outcome(&report).as_ref().unwrap();

    assert_eq!(cycle.decision, Decision::FastRemoval(3));
    assert_eq!(cycle.nodes_affected, 3);
    assert!(h.backend.calls().is_empty());

    let state = h.controller.node_group("shared").unwrap();
    assert_eq!(state.taint_tracker().len(), 3);
}

#[test]
fn dry_run_taints_shrink_capacity_on_next_sweep() {
    let mut config = PoolscaleConfig::from_toml_str(GROUP).unwrap();
    config.dry_run = true;
    let mut h = harness_with(&config, nodes(5), vec![pod("900m", "512Mi")], RecordingActions::default());

    // 900m of 5000m is 18%: three nodes get simulated taints.
    let first = h.controller.run_once();
    assert_eq!(outcome(&first).as_ref().unwrap().decision, Decision::FastRemoval(3));

    // 900m of the remaining 2000m is 45%: slow removal, but real taints
    // on the nodes themselves are ignored in dry-run.
    h.lister.set_nodes(nodes(5).into_iter().map(marked).collect());
    let second = h.controller.run_once();
    let cycle = outcome(&second).as_ref().unwrap();
    assert_eq!(cycle.tainted_nodes, 3);
    assert_eq!(cycle.usage_percent, 45);
    assert_eq!(cycle.decision, Decision::SlowRemoval(1));
    assert!(h.backend.calls().is_empty());
}

#[test]
fn real_mode_ignores_simulated_taints() {
    let mut h = harness(nodes(5), vec![pod("500m", "256Mi")]);

    h.controller.run_once();
    h.controller.run_once();

    // Both sweeps saw all five nodes untainted: nothing was simulated.
    let state = h.controller.node_group("shared").unwrap();
    assert!(state.taint_tracker().is_empty());
    assert_eq!(h.backend.calls(), vec![("scale_down", 3, -3), ("scale_down", 3, -3)]);
}

/// Counts list calls so the loop cadence can be observed.
struct CountingLister {
    sweeps: Arc<AtomicUsize>,
}

impl NodeGroupLister for CountingLister {
    fn list_pods(&self) -> anyhow::Result<Vec<Pod>> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }

    fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        Ok(vec![])
    }
}

#[tokio::test(start_paused = true)]
async fn run_forever_sweeps_on_interval_until_shutdown() {
    let doc = format!("scan_interval = \"10s\"\ndry_run = true\n{GROUP}");
    let config = PoolscaleConfig::from_toml_str(&doc).unwrap();
    let sweeps = Arc::new(AtomicUsize::new(0));
    let listers: HashMap<String, Arc<dyn NodeGroupLister>> = HashMap::from([(
        "shared".to_string(),
        Arc::new(CountingLister {
            sweeps: sweeps.clone(),
        }) as Arc<dyn NodeGroupLister>,
    )]);
    let metrics = MetricsRegistry::new();
    let mut controller = Controller::new(&config, listers, None, metrics.clone()).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        controller.run_forever(true, shutdown_rx).await;
    });

    // Immediate sweep plus ticks at 10s, 20s and 30s.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(sweeps.load(Ordering::SeqCst), 4);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sweeps.load(Ordering::SeqCst), 4);
    assert_eq!(metrics.snapshot().sweeps_total, 4);
}

#[tokio::test(start_paused = true)]
async fn run_forever_waits_a_full_interval_without_immediate_run() {
    let doc = format!("scan_interval = \"10s\"\ndry_run = true\n{GROUP}");
    let config = PoolscaleConfig::from_toml_str(&doc).unwrap();
    let sweeps = Arc::new(AtomicUsize::new(0));
    let listers: HashMap<String, Arc<dyn NodeGroupLister>> = HashMap::from([(
        "shared".to_string(),
        Arc::new(CountingLister {
            sweeps: sweeps.clone(),
        }) as Arc<dyn NodeGroupLister>,
    )]);
    let mut controller = Controller::new(&config, listers, None, MetricsRegistry::new()).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        controller.run_forever(false, shutdown_rx).await;
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sweeps.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sweeps.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
