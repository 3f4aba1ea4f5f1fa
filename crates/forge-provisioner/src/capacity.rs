//! Demand-driven capacity decisions.

use std::sync::Arc;
use std::time::Duration;

use forge_audit::{AuditLog, TerminationReason};
use forge_config::types::{ControllerConfig, FleetProfile};
use forge_gateway::{GatewayResult, OrchestratorGateway};
use forge_limiter::ProvisionRateLimiter;
use forge_metrics::FleetCounters;
use forge_registry::types::epoch_secs;
use forge_registry::{WorkerRecord, WorkerRegistry};
use forge_template::{first_match, resolve};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProvisionResult;
use crate::{executor, lifecycle};

/// Everything a provisioning task needs, cloneable into spawned work.
#[derive(Clone)]
pub(crate) struct ProvisionEnv {
    pub(crate) profile: Arc<FleetProfile>,
    pub(crate) controller: Arc<ControllerConfig>,
    pub(crate) gateway: Arc<dyn OrchestratorGateway>,
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) limiter: Arc<ProvisionRateLimiter>,
    pub(crate) audit: Arc<AuditLog>,
    pub(crate) counters: Arc<FleetCounters>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// One dispatched provisioning unit.
#[derive(Debug)]
pub struct ProvisionHandle {
    /// Generated worker name; also the workload name on the cluster.
    pub worker: String,
    pub template: String,
    /// Resolves when the attempt (including retries) finishes.
    pub task: JoinHandle<ProvisionResult<WorkerRecord>>,
}

/// Per-profile capacity decisioning.
///
/// Converts a `(demand label, excess workload)` signal into a bounded
/// number of dispatched provisioning tasks. The decision path stays
/// synchronous: counter reads, limiter checks and task spawns, never
/// an orchestrator call.
pub struct CapacityController {
    env: ProvisionEnv,
}

impl CapacityController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile: FleetProfile,
        controller: ControllerConfig,
        gateway: Arc<dyn OrchestratorGateway>,
        registry: Arc<WorkerRegistry>,
        limiter: Arc<ProvisionRateLimiter>,
        audit: Arc<AuditLog>,
        counters: Arc<FleetCounters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            env: ProvisionEnv {
                profile: Arc::new(profile),
                controller: Arc::new(controller),
                gateway,
                registry,
                limiter,
                audit,
                counters,
                shutdown,
            },
        }
    }

    pub fn profile(&self) -> &FleetProfile {
        &self.env.profile
    }

    pub fn profile_name(&self) -> &str {
        &self.env.profile.name
    }

    pub fn is_draining(&self) -> bool {
        *self.env.shutdown.borrow()
    }

    /// Would a demand with this label be served right now?
    pub fn can_provision(&self, demand: &str) -> bool {
        let profile = &self.env.profile;
        if self.is_draining() {
            return false;
        }
        if self.env.registry.profile_count(&profile.name) >= profile.max_workers {
            return false;
        }
        if first_match(&profile.templates, demand).is_none() {
            return false;
        }
        self.env
            .limiter
            .can_provision(&profile.name, &profile.rate_limit)
    }

    /// Convert excess demand into dispatched provisioning units.
    ///
    /// Returns one handle per dispatched unit, immediately. An empty
    /// list is a normal outcome: draining, full profile, no serving
    /// template, or rate limiting.
    pub fn provision(&self, demand: &str, excess: u32) -> Vec<ProvisionHandle> {
        let profile = &self.env.profile;
        if self.is_draining() {
            debug!(profile = %profile.name, "draining, refusing new capacity");
            return Vec::new();
        }
        if excess == 0 {
            return Vec::new();
        }

        let current = self.env.registry.profile_count(&profile.name);
        if current >= profile.max_workers {
            debug!(
                profile = %profile.name,
                current,
                max = profile.max_workers,
                "profile at capacity"
            );
            return Vec::new();
        }

        let Some(declared) = first_match(&profile.templates, demand) else {
            debug!(profile = %profile.name, demand, "no template serves this demand");
            return Vec::new();
        };

        if !self
            .env
            .limiter
            .can_provision(&profile.name, &profile.rate_limit)
        {
            self.env.counters.record_rate_limited();
            info!(profile = %profile.name, template = %declared.name, "provisioning rate limited");
            return Vec::new();
        }

        // Caps come from the resolved view so an inherited
        // max_instances is honored.
        let resolved = resolve(declared, profile);
        let template_current = self.env.registry.template_count(&profile.name, &declared.name);
        let template_remaining = resolved
            .max_instances
            .map_or(u32::MAX, |max| max.saturating_sub(template_current));
        let profile_remaining = profile.max_workers.saturating_sub(current);
        let limiter_remaining = self
            .env
            .limiter
            .remaining_in_window(&profile.name, &profile.rate_limit);

        let count = excess
            .min(profile_remaining)
            .min(template_remaining)
            .min(limiter_remaining);
        if count == 0 {
            debug!(
                profile = %profile.name,
                template = %declared.name,
                excess,
                profile_remaining,
                template_remaining,
                limiter_remaining,
                "demand cannot be served this cycle"
            );
            return Vec::new();
        }

        info!(
            profile = %profile.name,
            template = %declared.name,
            demand,
            excess,
            count,
            "dispatching provisioning units"
        );

        let mut handles = Vec::with_capacity(count as usize);
        for _ in 0..count {
            // Claim the window slot before dispatch; a concurrent
            // caller may have taken the last one since the check above.
            if !self
                .env
                .limiter
                .record_provision(&profile.name, &profile.rate_limit)
            {
                self.env.counters.record_rate_limited();
                warn!(profile = %profile.name, "provision window filled mid-dispatch");
                break;
            }
            let worker = worker_name(&declared.name);
            let env = self.env.clone();
            let template = declared.name.clone();
            let task_worker = worker.clone();
            let task = tokio::spawn(async move {
                executor::provision_one(env, &template, &task_worker).await
            });
            handles.push(ProvisionHandle {
                worker,
                template: declared.name.clone(),
                task,
            });
        }
        handles
    }

    /// Terminate one worker of this profile.
    pub async fn terminate(&self, worker: &str, reason: TerminationReason) -> GatewayResult<bool> {
        lifecycle::terminate_worker(
            self.env.gateway.as_ref(),
            &self.env.registry,
            &self.env.audit,
            &self.env.counters,
            worker,
            reason,
        )
        .await
    }

    /// One idle sweep: terminate workers idle past their timeout.
    /// Workers of templates without a timeout are never reaped.
    pub async fn reap_idle(&self) -> usize {
        let profile = &self.env.profile;
        let now = epoch_secs();
        let mut reaped = 0;
        for record in self.env.registry.idle_workers(&profile.name).await {
            let Some(timeout) = self.idle_timeout_for(&record.template) else {
                continue;
            };
            let Some(idle_since) = record.idle_since else {
                continue;
            };
            let idle_secs = now.saturating_sub(idle_since);
            if idle_secs < timeout {
                continue;
            }
            info!(worker = %record.name, idle_secs, timeout, "idle timeout reached");
            match self.terminate(&record.name, TerminationReason::IdleTimeout).await {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(worker = %record.name, %error, "idle termination failed");
                }
            }
        }
        reaped
    }

    /// Periodic idle sweeping until shutdown.
    pub async fn run_idle_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = self.reap_idle().await;
                    if reaped > 0 {
                        info!(profile = %self.profile_name(), reaped, "idle sweep");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(profile = %self.profile_name(), "idle sweeper stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Template-level idle timeout wins, profile-level is the
    /// fallback.
    fn idle_timeout_for(&self, template: &str) -> Option<u64> {
        let profile = &self.env.profile;
        profile
            .template(template)
            .and_then(|t| resolve(t, profile).idle_timeout_secs)
            .or(profile.idle_timeout_secs)
    }
}

/// `<template>-<8 hex chars>`, unique per dispatch.
fn worker_name(template: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{template}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_config::types::{AgentMode, AgentTemplate, RateLimitConfig};
    use forge_gateway::SimGateway;

    struct Harness {
        controller: CapacityController,
        gateway: Arc<SimGateway>,
        registry: Arc<WorkerRegistry>,
        counters: Arc<FleetCounters>,
        audit: Arc<AuditLog>,
        drain: watch::Sender<bool>,
    }

    fn controller_config() -> ControllerConfig {
        ControllerConfig {
            callback_url: "http://controller:9443/hook".to_string(),
            reconcile_interval_secs: 30,
            connect_poll_interval_secs: 1,
            idle_sweep_interval_secs: 30,
            audit_capacity: 64,
        }
    }

    fn template(name: &str, labels: &str, max_instances: Option<u32>) -> AgentTemplate {
        AgentTemplate {
            name: name.to_string(),
            labels: labels.to_string(),
            image: Some(format!("ci/{name}:1")),
            max_instances,
            ..AgentTemplate::default()
        }
    }

    fn profile(max_workers: u32, templates: Vec<AgentTemplate>) -> FleetProfile {
        FleetProfile {
            name: "prod".to_string(),
            endpoint: "tcp://orchestrator:2377".to_string(),
            credentials: None,
            max_workers,
            rate_limit: RateLimitConfig {
                max_per_minute: 100,
                min_interval_ms: 0,
            },
            idle_timeout_secs: None,
            templates,
        }
    }

    fn harness(profile: FleetProfile) -> Harness {
        let gateway = Arc::new(SimGateway::new());
        let registry = Arc::new(WorkerRegistry::new());
        let limiter = Arc::new(ProvisionRateLimiter::new());
        let audit = Arc::new(AuditLog::new(64));
        let counters = Arc::new(FleetCounters::new());
        let (drain, shutdown) = watch::channel(false);
        let controller = CapacityController::new(
            profile,
            controller_config(),
            gateway.clone(),
            registry.clone(),
            limiter,
            audit.clone(),
            counters.clone(),
            shutdown,
        );
        Harness {
            controller,
            gateway,
            registry,
            counters,
            audit,
            drain,
        }
    }

    #[tokio::test]
    async fn dispatch_is_bounded_by_every_cap() {
        let h = harness(profile(
            10,
            vec![template("maven", "maven", Some(5))],
        ));
        // Profile currently runs 8 workers, 4 of them maven.
        h.registry.counter("prod", "maven").store(4);
        h.registry.counter("prod", "other").store(4);

        let handles = h.controller.provision("maven", 10);
        assert_eq!(handles.len(), 1);

        let record = handles
            .into_iter()
            .next()
            .unwrap()
            .task
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.template, "maven");
        assert_eq!(h.registry.template_count("prod", "maven"), 5);
        assert_eq!(h.gateway.count().await, 1);
    }

    #[tokio::test]
    async fn draining_refuses_demand() {
        let h = harness(profile(10, vec![template("maven", "maven", None)]));
        h.drain.send(true).unwrap();

        assert!(!h.controller.can_provision("maven"));
        assert!(h.controller.provision("maven", 3).is_empty());
        assert!(h.controller.is_draining());
    }

    #[tokio::test]
    async fn unmatched_demand_is_a_quiet_no() {
        let h = harness(profile(10, vec![template("maven", "maven", None)]));
        assert!(!h.controller.can_provision("windows"));
        assert!(h.controller.provision("windows", 2).is_empty());
        assert_eq!(h.gateway.count().await, 0);
    }

    #[tokio::test]
    async fn exclusive_templates_skip_unlabeled_demand() {
        let mut exclusive = template("maven", "maven", None);
        exclusive.mode = Some(AgentMode::Exclusive);
        let h = harness(profile(10, vec![exclusive]));

        assert!(!h.controller.can_provision(""));
        assert!(h.controller.provision("", 1).is_empty());
        assert_eq!(h.controller.provision("maven", 1).len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_denial_counts_and_dispatches_nothing() {
        let mut p = profile(10, vec![template("maven", "maven", None)]);
        p.rate_limit = RateLimitConfig {
            max_per_minute: 1,
            min_interval_ms: 0,
        };
        let h = harness(p);

        let first = h.controller.provision("maven", 3);
        assert_eq!(first.len(), 1);
        for handle in first {
            handle.task.await.unwrap().unwrap();
        }

        let second = h.controller.provision("maven", 1);
        assert!(second.is_empty());
        assert_eq!(h.counters.snapshot().rate_limited_total, 1);
    }

    #[tokio::test]
    async fn successful_dispatch_registers_and_audits() {
        let h = harness(profile(10, vec![template("maven", "maven", None)]));

        let handles = h.controller.provision("maven jdk17", 2);
        // "maven jdk17" needs both tokens; template offers only maven.
        assert!(handles.is_empty());

        let handles = h.controller.provision("maven", 2);
        assert_eq!(handles.len(), 2);
        let mut names = Vec::new();
        for handle in handles {
            assert!(handle.worker.starts_with("maven-"));
            let record = handle.task.await.unwrap().unwrap();
            names.push(record.name.clone());
            let stored = h.registry.get(&record.name).await.unwrap();
            assert!(stored.state.is_live());
        }
        assert_ne!(names[0], names[1]);

        assert_eq!(h.counters.snapshot().provisions_total, 2);
        assert_eq!(h.audit.len().await, 2);
        assert_eq!(h.registry.profile_count("prod"), 2);
    }

    #[tokio::test]
    async fn idle_reaper_honors_timeouts() {
        let mut p = profile(10, vec![template("maven", "maven", None)]);
        p.idle_timeout_secs = Some(0);
        let h = harness(p);

        let handles = h.controller.provision("maven", 1);
        let record = handles
            .into_iter()
            .next()
            .unwrap()
            .task
            .await
            .unwrap()
            .unwrap();

        h.registry.mark_connected(&record.name).await;
        h.registry.mark_idle(&record.name).await;

        // Timeout of zero seconds: reapable immediately.
        assert_eq!(h.controller.reap_idle().await, 1);
        assert!(h.registry.get(&record.name).await.is_none());
        assert_eq!(h.registry.template_count("prod", "maven"), 0);
        assert_eq!(h.gateway.count().await, 0);
    }

    #[tokio::test]
    async fn workers_without_timeout_are_never_reaped() {
        let h = harness(profile(10, vec![template("maven", "maven", None)]));

        let handles = h.controller.provision("maven", 1);
        let record = handles
            .into_iter()
            .next()
            .unwrap()
            .task
            .await
            .unwrap()
            .unwrap();
        h.registry.mark_connected(&record.name).await;
        h.registry.mark_idle(&record.name).await;

        assert_eq!(h.controller.reap_idle().await, 0);
        assert!(h.registry.get(&record.name).await.is_some());
    }

    #[test]
    fn worker_names_are_prefixed_and_unique() {
        let a = worker_name("maven");
        let b = worker_name("maven");
        assert!(a.starts_with("maven-"));
        assert_eq!(a.len(), "maven-".len() + 8);
        assert_ne!(a, b);
    }
}
