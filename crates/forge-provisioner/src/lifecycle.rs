//! Worker lifecycle: connection establishment and termination.

use std::time::Duration;

use forge_audit::{AuditLog, TerminationReason};
use forge_gateway::{GatewayResult, OrchestratorGateway, OwnerTags, RemoveOutcome};
use forge_metrics::FleetCounters;
use forge_registry::{AgentState, WorkerRegistry};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capacity::ProvisionEnv;

/// Log lines fetched for diagnostics when a worker never connects.
const LOG_TAIL_LINES: u32 = 50;

/// Terminate one worker: release its capacity, remove the workload,
/// audit the termination.
///
/// Idempotent: an unknown worker returns `Ok(false)`; a workload that
/// is already gone cluster-side still counts as a successful
/// termination. On an orchestrator error the worker is put back so the
/// request can be repeated.
pub async fn terminate_worker(
    gateway: &dyn OrchestratorGateway,
    registry: &WorkerRegistry,
    audit: &AuditLog,
    counters: &FleetCounters,
    worker: &str,
    reason: TerminationReason,
) -> GatewayResult<bool> {
    registry.set_state(worker, AgentState::Terminating).await;
    // Claim the record; a concurrent terminate for the same worker
    // gets None here and backs off.
    let Some(mut record) = registry.remove(worker).await else {
        debug!(worker, "termination requested for unknown worker");
        return Ok(false);
    };

    let counter = registry.counter(&record.profile, &record.template);
    counter.decrement();

    match gateway.remove_workload(&record.handle).await {
        Ok(RemoveOutcome::Removed) => {}
        Ok(RemoveOutcome::NotFound) => {
            debug!(worker, "workload already gone, removal counts as success");
        }
        Err(error) => {
            // Put the claim back so the request can be retried.
            counter.increment();
            record.state = AgentState::Terminating;
            registry.register(record).await;
            warn!(worker, %error, "workload removal failed");
            return Err(error);
        }
    }

    counters.record_termination();
    audit
        .terminated(&record.profile, &record.template, worker, reason)
        .await;
    info!(
        worker,
        profile = %record.profile,
        template = %record.template,
        reason = reason.as_str(),
        "worker terminated"
    );
    Ok(true)
}

/// Watch a freshly created worker until its control channel comes up.
pub(crate) fn spawn_connection_watch(
    env: ProvisionEnv,
    worker: String,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move { watch_connection(env, worker, timeout).await })
}

async fn watch_connection(env: ProvisionEnv, worker: String, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_secs(env.controller.connect_poll_interval_secs.max(1));
    env.registry
        .transition_if(&worker, AgentState::Provisioning, AgentState::Connecting)
        .await;

    loop {
        match env.registry.get(&worker).await {
            // Terminated while we watched.
            None => return,
            Some(record) if record.state == AgentState::Active => {
                info!(worker, "worker connected");
                return;
            }
            Some(record) if record.state != AgentState::Connecting => return,
            _ => {}
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(poll).await;

        // A workload that vanished mid-wait fails now, not at the
        // timeout.
        match env
            .gateway
            .list_workloads(&OwnerTags::for_profile(&env.profile.name))
            .await
        {
            Ok(listed) => {
                if !listed.iter().any(|w| w.name == worker) {
                    warn!(worker, "workload disappeared before connecting");
                    cleanup(&env, &worker).await;
                    return;
                }
            }
            // Transient listing trouble; keep waiting.
            Err(error) => debug!(worker, %error, "presence check failed"),
        }
    }

    // Timed out with no connection.
    let Some(record) = env.registry.get(&worker).await else {
        return;
    };
    env.counters.record_connect_timeout();
    match env.gateway.fetch_logs(&record.handle, LOG_TAIL_LINES).await {
        Ok(tail) if !tail.is_empty() => {
            warn!(worker, output = %tail, "worker never connected; recent output follows");
        }
        Ok(_) => warn!(worker, "worker never connected; no output captured"),
        Err(error) => warn!(worker, %error, "worker never connected; log fetch failed"),
    }
    env.registry
        .set_state(&worker, AgentState::FailedConnect)
        .await;
    cleanup(&env, &worker).await;
}

async fn cleanup(env: &ProvisionEnv, worker: &str) {
    if let Err(error) = terminate_worker(
        env.gateway.as_ref(),
        &env.registry,
        &env.audit,
        &env.counters,
        worker,
        TerminationReason::ConnectionLost,
    )
    .await
    {
        warn!(worker, %error, "cleanup after lost connection failed");
    }
}
