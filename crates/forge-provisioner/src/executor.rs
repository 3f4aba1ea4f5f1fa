//! One asynchronous provisioning attempt.

use std::time::Duration;

use forge_gateway::{GatewayError, WorkloadSpec};
use forge_registry::WorkerRecord;
use forge_template::resolve;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capacity::ProvisionEnv;
use crate::error::{ProvisionError, ProvisionResult};
use crate::lifecycle;

/// Retries after the first failed attempt, when the template does not
/// say otherwise.
const DEFAULT_RETRY_COUNT: u32 = 2;
/// Base backoff delay, when the template does not say otherwise.
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// How long a worker may take to establish its control channel, when
/// the template does not say otherwise.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 300;

/// Provision one worker, with retry and capped exponential backoff.
///
/// Runs off the decision path; orchestrator latency lands here, never
/// in the capacity decision. On success the worker is registered in
/// `Provisioning` state and a connection watch is spawned. On retry
/// exhaustion the failure is recorded with the rate limiter and the
/// audit trail, and surfaces through the returned error.
pub(crate) async fn provision_one(
    mut env: ProvisionEnv,
    template_name: &str,
    worker: &str,
) -> ProvisionResult<WorkerRecord> {
    let profile = env.profile.clone();
    let Some(declared) = profile.template(template_name) else {
        return Err(ProvisionError::Configuration(format!(
            "template '{template_name}' not found in profile '{}'",
            profile.name
        )));
    };

    // Fresh resolution per dispatched unit: a parent edited between
    // decisions takes effect without a restart.
    let resolved = resolve(declared, &profile);
    let spec = WorkloadSpec::from_template(&resolved, &profile.name)
        .map_err(|error| ProvisionError::Configuration(error.to_string()))?;
    let retry_count = resolved.retry_count.unwrap_or(DEFAULT_RETRY_COUNT);
    let base_delay =
        Duration::from_millis(resolved.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS));

    let mut last_error: Option<GatewayError> = None;
    for attempt in 0..=retry_count {
        if attempt > 0 {
            let delay = backoff_delay(base_delay, attempt);
            debug!(worker, attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
            if !interruptible_sleep(delay, &mut env.shutdown).await {
                info!(worker, "provisioning interrupted during backoff");
                return Err(ProvisionError::Interrupted);
            }
        }

        match env
            .gateway
            .create_workload(worker, &spec, &env.controller.callback_url)
            .await
        {
            Ok(handle) => {
                env.registry.counter(&profile.name, &resolved.name).increment();
                env.limiter.reset_failures(&profile.name);
                env.counters.record_provision();
                env.audit.provisioned(&profile.name, &resolved.name, worker).await;

                let record = WorkerRecord::new(
                    worker,
                    handle,
                    &profile.name,
                    &resolved.name,
                    resolved.executors.unwrap_or(1),
                );
                env.registry.register(record.clone()).await;
                info!(
                    worker,
                    profile = %profile.name,
                    template = %resolved.name,
                    attempt,
                    "worker provisioned"
                );

                let connect_timeout = Duration::from_secs(
                    resolved
                        .connect_timeout_secs
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                );
                lifecycle::spawn_connection_watch(env.clone(), worker.to_string(), connect_timeout);
                return Ok(record);
            }
            Err(error) if !error.is_transient() => {
                warn!(worker, attempt, %error, "non-retryable provisioning error");
                return Err(ProvisionError::Configuration(error.to_string()));
            }
            Err(error) => {
                warn!(worker, attempt, %error, "provisioning attempt failed");
                last_error = Some(error);
            }
        }
    }

    let last = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    env.limiter.record_failure(&profile.name);
    env.counters.record_provision_failure();
    env.audit
        .provision_failed(&profile.name, &resolved.name, worker, &last)
        .await;
    Err(ProvisionError::Exhausted {
        attempts: retry_count + 1,
        last_error: last,
    })
}

/// `base * 2^(attempt-1)`, capped. `attempt` is at least 1.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Sleep that a drain signal can cut short. Returns `false` when
/// interrupted. A dropped sender means no drain can ever arrive; the
/// sleep then completes normally.
pub(crate) async fn interruptible_sleep(
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    sleep.as_mut().await;
                    return true;
                }
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use forge_audit::{AuditKind, AuditLog};
    use forge_config::types::{AgentTemplate, ControllerConfig, FleetProfile, RateLimitConfig};
    use forge_gateway::{OrchestratorGateway, SimGateway};
    use forge_limiter::ProvisionRateLimiter;
    use forge_metrics::FleetCounters;
    use forge_registry::WorkerRegistry;
    use tokio::sync::watch;

    struct Rig {
        env: ProvisionEnv,
        gateway: Arc<SimGateway>,
        drain: watch::Sender<bool>,
    }

    fn rig(template: AgentTemplate) -> Rig {
        let profile = FleetProfile {
            name: "prod".to_string(),
            endpoint: "tcp://orchestrator:2377".to_string(),
            credentials: None,
            max_workers: 10,
            rate_limit: RateLimitConfig {
                max_per_minute: 100,
                min_interval_ms: 0,
            },
            idle_timeout_secs: None,
            templates: vec![template],
        };
        let controller = ControllerConfig {
            callback_url: "http://controller:9443/hook".to_string(),
            reconcile_interval_secs: 30,
            connect_poll_interval_secs: 1,
            idle_sweep_interval_secs: 30,
            audit_capacity: 64,
        };
        let gateway = Arc::new(SimGateway::new());
        let (drain, shutdown) = watch::channel(false);
        let env = ProvisionEnv {
            profile: Arc::new(profile),
            controller: Arc::new(controller),
            gateway: gateway.clone() as Arc<dyn OrchestratorGateway>,
            registry: Arc::new(WorkerRegistry::new()),
            limiter: Arc::new(ProvisionRateLimiter::new()),
            audit: Arc::new(AuditLog::new(64)),
            counters: Arc::new(FleetCounters::new()),
            shutdown,
        };
        Rig { env, gateway, drain }
    }

    fn maven(retry_count: u32, retry_delay_ms: u64) -> AgentTemplate {
        AgentTemplate {
            name: "maven".to_string(),
            labels: "maven".to_string(),
            image: Some("ci/maven-agent:3".to_string()),
            executors: Some(2),
            retry_count: Some(retry_count),
            retry_delay_ms: Some(retry_delay_ms),
            ..AgentTemplate::default()
        }
    }

    #[tokio::test]
    async fn two_failures_then_success_backs_off_twice() {
        let r = rig(maven(3, 50));
        r.gateway.fail_next_creates(2);

        let started = Instant::now();
        let record = provision_one(r.env.clone(), "maven", "maven-t1").await.unwrap();
        let elapsed = started.elapsed();

        // Waits of 50ms and 100ms separate the three calls.
        assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(900), "elapsed {elapsed:?}");
        assert_eq!(r.gateway.create_calls(), 3);

        assert_eq!(record.executors, 2);
        assert_eq!(r.env.registry.template_count("prod", "maven"), 1);
        assert_eq!(r.env.counters.snapshot().provisions_total, 1);
        // Success resets the failure escalation.
        assert_eq!(r.env.limiter.consecutive_failures("prod"), 0);

        let recent = r.env.audit.recent(5).await;
        assert_eq!(recent[0].kind, AuditKind::Provisioned);
    }

    #[tokio::test]
    async fn exhausted_retries_record_the_failure() {
        let r = rig(maven(1, 10));
        r.gateway.fail_next_creates(5);

        let err = provision_one(r.env.clone(), "maven", "maven-t2").await.unwrap_err();
        match err {
            ProvisionError::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("injected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(r.gateway.create_calls(), 2);
        assert_eq!(r.env.limiter.consecutive_failures("prod"), 1);
        assert_eq!(r.env.counters.snapshot().provision_failures_total, 1);
        assert_eq!(r.env.registry.template_count("prod", "maven"), 0);

        let recent = r.env.audit.recent(5).await;
        assert_eq!(recent[0].kind, AuditKind::ProvisionFailed);
        assert!(recent[0].detail.contains("injected"));
    }

    #[tokio::test]
    async fn broken_template_fails_without_limiter_penalty() {
        let mut broken = maven(3, 10);
        broken.image = None;
        let r = rig(broken);

        let err = provision_one(r.env.clone(), "maven", "maven-t3").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));

        // No orchestrator call, no failure escalation, no audit entry.
        assert_eq!(r.gateway.create_calls(), 0);
        assert_eq!(r.env.limiter.consecutive_failures("prod"), 0);
        assert!(r.env.audit.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_template_is_a_configuration_error() {
        let r = rig(maven(0, 10));
        let err = provision_one(r.env.clone(), "gradle", "gradle-t1").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
    }

    #[tokio::test]
    async fn drain_interrupts_a_backoff_wait() {
        let r = rig(maven(3, 500));
        r.gateway.fail_next_creates(5);

        let env = r.env.clone();
        let task = tokio::spawn(async move { provision_one(env, "maven", "maven-t4").await });
        // First attempt fails fast; the task is now in its 500ms wait.
        tokio::time::sleep(Duration::from_millis(100)).await;
        r.drain.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ProvisionError::Interrupted));
        assert_eq!(r.gateway.create_calls(), 1);
    }

    #[tokio::test]
    async fn interruptible_sleep_outcomes() {
        let (tx, mut rx) = watch::channel(false);
        assert!(interruptible_sleep(Duration::from_millis(10), &mut rx).await);

        let flip = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let started = Instant::now();
        assert!(!interruptible_sleep(Duration::from_secs(5), &mut rx).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        flip.await.unwrap();

        // Already-drained receivers refuse immediately.
        assert!(!interruptible_sleep(Duration::from_millis(10), &mut rx).await);
    }

    #[tokio::test]
    async fn dropped_sender_lets_the_sleep_finish() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let started = Instant::now();
        assert!(interruptible_sleep(Duration::from_millis(50), &mut rx).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 8), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::from_secs(40), 1), MAX_BACKOFF);
    }
}
