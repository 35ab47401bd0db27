//! The controller owns every node group and sweeps them on a fixed cadence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use poolscale_core::PoolscaleConfig;
use poolscale_metrics::MetricsRegistry;

use crate::actions::{ScaleActions, SimulatedActions};
use crate::engine::{CycleReport, scale_node_group};
use crate::error::{ControllerError, CycleError};
use crate::state::{NodeGroupLister, NodeGroupState};

/// Outcome of one sweep over all node groups, in evaluation order.
#[derive(Debug)]
pub struct SweepReport {
    pub outcomes: Vec<(String, Result<CycleReport, CycleError>)>,
    pub duration: Duration,
}

impl SweepReport {
    pub fn get(&self, node_group: &str) -> Option<&Result<CycleReport, CycleError>> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == node_group)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_err()).count()
    }
}

/// The autoscaler: decides and dispatches one scaling action per node
/// group per sweep.
pub struct Controller {
    scan_interval: Duration,
    dry_run: bool,
    node_groups: BTreeMap<String, NodeGroupState>,
    /// Real pool mutations. Never used for groups in dry-run.
    backend: Option<Arc<dyn ScaleActions>>,
    simulated: SimulatedActions,
    metrics: MetricsRegistry,
}

impl Controller {
    /// Build a controller with one lister per configured node group.
    ///
    /// Fails if the config is invalid, a group has no lister, or a group
    /// outside dry-run has no backend to mutate the pool with.
    pub fn new(
        config: &PoolscaleConfig,
        mut listers: HashMap<String, Arc<dyn NodeGroupLister>>,
        backend: Option<Arc<dyn ScaleActions>>,
        metrics: MetricsRegistry,
    ) -> Result<Self, ControllerError> {
        config.validate()?;

        let mut node_groups = BTreeMap::new();
        for group in &config.node_groups {
            let lister = listers
                .remove(&group.name)
                .ok_or_else(|| ControllerError::MissingLister(group.name.clone()))?;

            if backend.is_none() && !(config.dry_run || group.dry_run) {
                return Err(ControllerError::NoScaleBackend(group.name.clone()));
            }

            if !group.thresholds_ordered() {
                warn!(
                    node_group = %group.name,
                    lower = group.taint_lower_threshold_percent,
                    upper = group.taint_upper_threshold_percent,
                    scale_up = group.scale_up_threshold_percent,
                    "thresholds are not ordered lower <= upper <= scale_up; first matching rule wins"
                );
            }

            node_groups.insert(group.name.clone(), NodeGroupState::new(group.clone(), lister));
        }

        for unused in listers.keys() {
            warn!(node_group = %unused, "lister registered for unknown node group");
        }

        info!(
            node_groups = node_groups.len(),
            dry_run = config.dry_run,
            scan_interval_secs = config.scan_interval.as_secs(),
            "controller initialized"
        );

        Ok(Self {
            scan_interval: config.scan_interval,
            dry_run: config.dry_run,
            node_groups,
            backend,
            simulated: SimulatedActions,
            metrics,
        })
    }

    /// Whether `node_group` runs in dry-run, globally or on its own.
    pub fn dry_run(&self, node_group: &str) -> bool {
        self.dry_run
            || self
                .node_groups
                .get(node_group)
                .is_some_and(|state| state.config().dry_run)
    }

    pub fn node_group(&self, name: &str) -> Option<&NodeGroupState> {
        self.node_groups.get(name)
    }

    /// Evaluate every node group once.
    ///
    /// A failing group is logged and skipped; it never stops the sweep.
    pub fn run_once(&mut self) -> SweepReport {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(self.node_groups.len());

        for (name, state) in self.node_groups.iter_mut() {
            debug!(node_group = %name, "evaluating node group");

            let dry_run = self.dry_run || state.config().dry_run;
            let actions: Option<&dyn ScaleActions> = if dry_run {
                Some(&self.simulated)
            } else {
                self.backend.as_deref()
            };

            let outcome = match actions {
                Some(actions) => scale_node_group(state, dry_run, actions, &self.metrics),
                None => Err(CycleError::NoScaleBackend),
            };

            match &outcome {
                Err(e) if e.is_anomaly() => warn!(node_group = %name, "{e}"),
                Err(e) => error!(node_group = %name, error = %e, "node group cycle failed"),
                Ok(_) => {}
            }
            outcomes.push((name.clone(), outcome));
        }

        let duration = start.elapsed();
        self.metrics.record_sweep(duration);
        debug!(?duration, "scaling sweep finished");

        SweepReport { outcomes, duration }
    }

    /// Sweep every `scan_interval` until `shutdown` flips.
    ///
    /// A sweep in progress always completes; shutdown is only observed
    /// between sweeps.
    pub async fn run_forever(&mut self, run_immediately: bool, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "autoscaler started"
        );

        if run_immediately {
            debug!("first sweep");
            self.run_once();
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.scan_interval,
            self.scan_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("main loop sweep");
                    self.run_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("autoscaler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
