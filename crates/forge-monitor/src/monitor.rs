//! The reconciliation loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use forge_config::types::FleetProfile;
use forge_gateway::{GatewayResult, OrchestratorGateway, OwnerTags};
use forge_metrics::FleetCounters;
use forge_registry::WorkerRegistry;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::snapshot::ClusterSnapshot;

/// One profile paired with the gateway reaching its cluster.
#[derive(Clone)]
pub struct ProfileTarget {
    pub profile: Arc<FleetProfile>,
    pub gateway: Arc<dyn OrchestratorGateway>,
}

impl ProfileTarget {
    pub fn new(profile: Arc<FleetProfile>, gateway: Arc<dyn OrchestratorGateway>) -> Self {
        Self { profile, gateway }
    }
}

/// Periodically rebuilds ground truth from each profile's orchestrator
/// and overwrites drifted instance counters with observed counts.
pub struct ReconciliationMonitor {
    targets: Vec<ProfileTarget>,
    registry: Arc<WorkerRegistry>,
    counters: Arc<FleetCounters>,
    snapshots: RwLock<HashMap<String, ClusterSnapshot>>,
}

impl ReconciliationMonitor {
    pub fn new(
        targets: Vec<ProfileTarget>,
        registry: Arc<WorkerRegistry>,
        counters: Arc<FleetCounters>,
    ) -> Self {
        Self {
            targets,
            registry,
            counters,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Run one reconciliation cycle over every profile.
    ///
    /// A profile whose collection fails gets a degraded snapshot and
    /// does not stop the remaining profiles from reconciling.
    pub async fn reconcile_all(&self) {
        for target in &self.targets {
            let name = target.profile.name.clone();
            let snapshot = match self.reconcile_profile(target).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    warn!(profile = %name, %error, "reconciliation failed, snapshot degraded");
                    self.counters.record_reconcile_failure();
                    ClusterSnapshot::degraded(name.clone(), error.to_string())
                }
            };
            self.snapshots.write().await.insert(name, snapshot);
        }
        self.counters.record_reconcile_cycle();
        debug!(profiles = self.targets.len(), "reconciliation cycle complete");
    }

    async fn reconcile_profile(&self, target: &ProfileTarget) -> GatewayResult<ClusterSnapshot> {
        let profile = &target.profile;
        let listed = target
            .gateway
            .list_workloads(&OwnerTags::for_profile(&profile.name))
            .await?;

        let mut observed: BTreeMap<String, u32> = BTreeMap::new();
        for workload in &listed {
            if let Some(template) = &workload.template {
                *observed.entry(template.clone()).or_insert(0) += 1;
            }
        }
        // Counters are corrected as soon as the listing is in hand; a
        // summary failure afterwards degrades the snapshot only.
        self.overwrite_counters(profile, &observed);

        let summary = target.gateway.cluster_summary().await?;
        Ok(ClusterSnapshot::collected(
            profile.name.clone(),
            &summary,
            &listed,
            observed,
        ))
    }

    /// Overwrite each template's instance counter with the count the
    /// orchestrator reports. Overwrite, not adjust: counters drift
    /// from out-of-band removals, evictions, and crashes between a
    /// removal and its decrement.
    fn overwrite_counters(&self, profile: &FleetProfile, observed: &BTreeMap<String, u32>) {
        for template in &profile.templates {
            let count = observed.get(&template.name).copied().unwrap_or(0);
            let counter = self.registry.counter(&profile.name, &template.name);
            let previous = counter.get();
            if previous != count {
                info!(
                    profile = %profile.name,
                    template = %template.name,
                    previous,
                    observed = count,
                    "instance counter corrected"
                );
            }
            // Can race with an in-flight provision's increment;
            // last write wins and the next cycle corrects it.
            counter.store(count);
        }
        for (template, count) in observed {
            if profile.template(template).is_none() {
                // Tag from a template dropped from configuration;
                // keep its counter truthful anyway.
                self.registry.counter(&profile.name, template).store(*count);
            }
        }
    }

    /// The most recent snapshot for one profile.
    pub async fn snapshot(&self, profile: &str) -> Option<ClusterSnapshot> {
        self.snapshots.read().await.get(profile).cloned()
    }

    /// All profile snapshots, ordered by profile name.
    pub async fn snapshots(&self) -> Vec<ClusterSnapshot> {
        let mut all: Vec<ClusterSnapshot> =
            self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.profile.cmp(&b.profile));
        all
    }

    /// Reconcile on a fixed cadence until drained. The first cycle
    /// runs immediately, so a restarted controller rebuilds counters
    /// before its first capacity decision is likely to arrive.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("reconciliation monitor stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_config::quantity::{MemoryBytes, Millicores};
    use forge_config::types::{AgentTemplate, RateLimitConfig};
    use forge_gateway::spec::WorkloadSpec;
    use forge_gateway::{NodeSummary, SimGateway, UnitState};

    fn profile(name: &str) -> Arc<FleetProfile> {
        Arc::new(FleetProfile {
            name: name.to_string(),
            endpoint: "tcp://orchestrator:2377".to_string(),
            credentials: None,
            max_workers: 10,
            rate_limit: RateLimitConfig::default(),
            idle_timeout_secs: None,
            templates: vec![AgentTemplate {
                name: "maven".to_string(),
                labels: "maven".to_string(),
                image: Some("ci/maven-agent:3".to_string()),
                ..AgentTemplate::default()
            }],
        })
    }

    fn fixture(
        targets: Vec<ProfileTarget>,
    ) -> (Arc<ReconciliationMonitor>, Arc<WorkerRegistry>, Arc<FleetCounters>) {
        let registry = Arc::new(WorkerRegistry::new());
        let counters = Arc::new(FleetCounters::new());
        let monitor = Arc::new(ReconciliationMonitor::new(
            targets,
            Arc::clone(&registry),
            Arc::clone(&counters),
        ));
        (monitor, registry, counters)
    }

    async fn create_worker(gateway: &SimGateway, profile: &str, template: &str, name: &str) {
        let template = AgentTemplate {
            name: template.to_string(),
            image: Some(format!("ci/{template}:1")),
            ..AgentTemplate::default()
        };
        let spec = WorkloadSpec::from_template(&template, profile).unwrap();
        gateway.create_workload(name, &spec, "url").await.unwrap();
    }

    #[tokio::test]
    async fn drifted_counter_is_corrected_to_the_observed_count() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, registry, counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway.clone())]);

        for n in 1..=3 {
            create_worker(&gateway, "prod", "maven", &format!("maven-{n}")).await;
        }
        // Bookkeeping says five; the cluster says three.
        registry.counter("prod", "maven").store(5);

        monitor.reconcile_all().await;

        assert_eq!(registry.template_count("prod", "maven"), 3);
        let snapshot = monitor.snapshot("prod").await.unwrap();
        assert!(snapshot.healthy);
        assert_eq!(snapshot.template_counts["maven"], 3);
        assert_eq!(counters.snapshot().reconcile_cycles_total, 1);
        assert_eq!(counters.snapshot().reconcile_failures_total, 0);
    }

    #[tokio::test]
    async fn counters_reset_to_zero_when_nothing_is_listed() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, registry, _counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway)]);

        registry.counter("prod", "maven").store(4);
        monitor.reconcile_all().await;
        assert_eq!(registry.template_count("prod", "maven"), 0);
    }

    #[tokio::test]
    async fn one_profile_failure_does_not_block_the_rest() {
        let prod_gateway = Arc::new(SimGateway::new());
        let staging_gateway = Arc::new(SimGateway::new());
        let (monitor, registry, counters) = fixture(vec![
            ProfileTarget::new(profile("prod"), prod_gateway.clone()),
            ProfileTarget::new(profile("staging"), staging_gateway.clone()),
        ]);

        create_worker(&staging_gateway, "staging", "maven", "maven-a").await;
        create_worker(&staging_gateway, "staging", "maven", "maven-b").await;
        registry.counter("staging", "maven").store(9);
        prod_gateway.fail_next_lists(1);

        monitor.reconcile_all().await;

        let prod = monitor.snapshot("prod").await.unwrap();
        assert!(!prod.healthy);
        assert!(prod.error.as_deref().unwrap().contains("injected list fault"));

        let staging = monitor.snapshot("staging").await.unwrap();
        assert!(staging.healthy);
        assert_eq!(registry.template_count("staging", "maven"), 2);
        assert_eq!(counters.snapshot().reconcile_failures_total, 1);
        assert_eq!(counters.snapshot().reconcile_cycles_total, 1);
    }

    #[tokio::test]
    async fn snapshot_reports_nodes_and_workload_states() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, _registry, _counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway.clone())]);

        gateway
            .set_nodes(vec![
                NodeSummary {
                    id: "n1".to_string(),
                    hostname: "worker-1".to_string(),
                    ready: true,
                    cpu: Millicores::from_cores(8),
                    memory: MemoryBytes::from_mib(16 * 1024),
                },
                NodeSummary {
                    id: "n2".to_string(),
                    hostname: "worker-2".to_string(),
                    ready: false,
                    cpu: Millicores::from_cores(8),
                    memory: MemoryBytes::from_mib(16 * 1024),
                },
            ])
            .await;
        create_worker(&gateway, "prod", "maven", "maven-a").await;
        create_worker(&gateway, "prod", "maven", "maven-b").await;
        gateway.set_units("maven-b", vec![UnitState::Failed]).await;

        monitor.reconcile_all().await;

        let snapshot = monitor.snapshot("prod").await.unwrap();
        assert_eq!(snapshot.nodes_total, 2);
        assert_eq!(snapshot.nodes_ready, 1);
        assert_eq!(snapshot.cpu_total, Millicores::from_cores(16));
        // Listing is name-sorted, so maven-a comes first.
        assert_eq!(snapshot.workloads[0].state, UnitState::Running);
        assert_eq!(snapshot.workloads[1].state, UnitState::Failed);
        assert_eq!(snapshot.live_workloads(), 1);
    }

    #[tokio::test]
    async fn degraded_snapshot_replaces_the_previous_healthy_one() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, _registry, counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway.clone())]);

        monitor.reconcile_all().await;
        assert!(monitor.snapshot("prod").await.unwrap().healthy);

        gateway.fail_next_lists(1);
        monitor.reconcile_all().await;

        let snapshot = monitor.snapshot("prod").await.unwrap();
        assert!(!snapshot.healthy);
        assert!(snapshot.error.is_some());
        assert_eq!(counters.snapshot().reconcile_cycles_total, 2);
        assert_eq!(counters.snapshot().reconcile_failures_total, 1);
    }

    #[tokio::test]
    async fn tags_for_unconfigured_templates_are_still_counted() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, registry, _counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway.clone())]);

        // "legacy" is not in the profile's template list.
        create_worker(&gateway, "prod", "legacy", "legacy-a").await;

        monitor.reconcile_all().await;

        assert_eq!(registry.template_count("prod", "legacy"), 1);
        let snapshot = monitor.snapshot("prod").await.unwrap();
        assert_eq!(snapshot.template_counts["legacy"], 1);
    }

    #[tokio::test]
    async fn run_loop_reconciles_until_drained() {
        let gateway = Arc::new(SimGateway::new());
        let (monitor, _registry, counters) =
            fixture(vec![ProfileTarget::new(profile("prod"), gateway)]);

        let (drain, shutdown) = watch::channel(false);
        let task = tokio::spawn(
            Arc::clone(&monitor).run(Duration::from_millis(50), shutdown),
        );
        tokio::time::sleep(Duration::from_millis(130)).await;
        drain.send(true).unwrap();
        task.await.unwrap();

        // Immediate first cycle plus at least one more tick.
        assert!(counters.snapshot().reconcile_cycles_total >= 2);
        let all = monitor.snapshots().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].profile, "prod");
    }
}
