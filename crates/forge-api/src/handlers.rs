//! REST API handlers.
//!
//! Each handler reads or drives the controller components held in
//! `ApiState` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use forge_audit::TerminationReason;
use forge_metrics::{CounterSnapshot, ProfileGauge, TemplateGauge, render_prometheus};
use forge_monitor::ClusterSnapshot;
use forge_provisioner::CapacityController;
use tracing::{debug, info};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Profiles ───────────────────────────────────────────────────

/// Capacity usage of one profile.
#[derive(serde::Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub endpoint: String,
    pub max_workers: u32,
    pub workers: u32,
    pub draining: bool,
    pub healthy: bool,
    pub templates: usize,
}

/// One template with its live instance count, in resolved form.
#[derive(serde::Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub labels: String,
    pub image: Option<String>,
    pub executors: Option<u32>,
    pub instances: u32,
    pub max_instances: Option<u32>,
}

#[derive(serde::Serialize)]
pub struct ProfileDetail {
    pub name: String,
    pub endpoint: String,
    pub max_workers: u32,
    pub workers: u32,
    pub draining: bool,
    pub healthy: bool,
    pub templates: Vec<TemplateSummary>,
}

async fn profile_summary(state: &ApiState, controller: &CapacityController) -> ProfileSummary {
    let profile = controller.profile();
    let healthy = state
        .monitor
        .snapshot(&profile.name)
        .await
        .map(|snapshot| snapshot.healthy)
        .unwrap_or(true);
    ProfileSummary {
        name: profile.name.clone(),
        endpoint: profile.endpoint.clone(),
        max_workers: profile.max_workers,
        workers: state.registry.profile_count(&profile.name),
        draining: controller.is_draining(),
        healthy,
        templates: profile.templates.len(),
    }
}

fn template_summaries(state: &ApiState, controller: &CapacityController) -> Vec<TemplateSummary> {
    let profile = controller.profile();
    profile
        .templates
        .iter()
        .map(|template| {
            let resolved = forge_template::resolve(template, profile);
            TemplateSummary {
                name: template.name.clone(),
                labels: resolved.labels.clone(),
                image: resolved.image.clone(),
                executors: resolved.executors,
                instances: state.registry.template_count(&profile.name, &template.name),
                max_instances: resolved.max_instances,
            }
        })
        .collect()
}

/// GET /api/v1/profiles
pub async fn list_profiles(State(state): State<ApiState>) -> impl IntoResponse {
    let mut profiles = Vec::with_capacity(state.controllers.len());
    for controller in state.controllers.values() {
        profiles.push(profile_summary(&state, controller).await);
    }
    ApiResponse::ok(profiles).into_response()
}

/// GET /api/v1/profiles/{name}
pub async fn get_profile(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(controller) = state.controllers.get(&name) else {
        return error_response("profile not found", StatusCode::NOT_FOUND).into_response();
    };
    let summary = profile_summary(&state, controller).await;
    ApiResponse::ok(ProfileDetail {
        name: summary.name,
        endpoint: summary.endpoint,
        max_workers: summary.max_workers,
        workers: summary.workers,
        draining: summary.draining,
        healthy: summary.healthy,
        templates: template_summaries(&state, controller),
    })
    .into_response()
}

/// GET /api/v1/profiles/{name}/templates
pub async fn profile_templates(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.controllers.get(&name) {
        Some(controller) => ApiResponse::ok(template_summaries(&state, controller)).into_response(),
        None => error_response("profile not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Provisioning ───────────────────────────────────────────────

/// Manual demand submission body.
#[derive(serde::Deserialize)]
pub struct ProvisionRequest {
    /// Demand label expression; empty means unlabeled demand.
    #[serde(default)]
    pub labels: String,
    /// Excess workload not served by current capacity.
    #[serde(default = "default_excess")]
    pub excess: u32,
}

fn default_excess() -> u32 {
    1
}

#[derive(serde::Serialize)]
pub struct DispatchedUnit {
    pub worker: String,
    pub template: String,
}

/// POST /api/v1/profiles/{name}/provision
pub async fn provision(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<ProvisionRequest>,
) -> impl IntoResponse {
    let Some(controller) = state.controllers.get(&name) else {
        return error_response("profile not found", StatusCode::NOT_FOUND).into_response();
    };
    // Dropping the join handles detaches the provisioning tasks; their
    // outcome lands in the registry and the audit trail.
    let dispatched: Vec<DispatchedUnit> = controller
        .provision(&req.labels, req.excess)
        .into_iter()
        .map(|handle| DispatchedUnit {
            worker: handle.worker,
            template: handle.template,
        })
        .collect();
    info!(
        profile = %name,
        labels = %req.labels,
        excess = req.excess,
        dispatched = dispatched.len(),
        "manual provisioning request"
    );
    ApiResponse::ok(dispatched).into_response()
}

// ── Workers ────────────────────────────────────────────────────

/// GET /api/v1/workers
pub async fn list_workers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.workers().await).into_response()
}

/// GET /api/v1/workers/{name}
pub async fn get_worker(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&name).await {
        Some(record) => ApiResponse::ok(record).into_response(),
        None => error_response("worker not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// DELETE /api/v1/workers/{name}
pub async fn delete_worker(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(record) = state.registry.get(&name).await else {
        return error_response("worker not found", StatusCode::NOT_FOUND).into_response();
    };
    match state.controllers.get(&record.profile) {
        Some(controller) => {
            match controller.terminate(&name, TerminationReason::Manual).await {
                Ok(true) => ApiResponse::ok("terminated").into_response(),
                Ok(false) => {
                    error_response("worker not found", StatusCode::NOT_FOUND).into_response()
                }
                Err(e) => {
                    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response()
                }
            }
        }
        None => {
            // The owning profile left the configuration, so there is
            // no endpoint to call; release the local claim only.
            if state.registry.remove(&name).await.is_some() {
                state
                    .registry
                    .counter(&record.profile, &record.template)
                    .decrement();
                state.counters.record_termination();
                state
                    .audit
                    .terminated(
                        &record.profile,
                        &record.template,
                        &name,
                        TerminationReason::ProfileMissing,
                    )
                    .await;
                info!(worker = %name, profile = %record.profile, "orphaned worker released");
            }
            ApiResponse::ok("terminated").into_response()
        }
    }
}

// ── Scheduler and agent signals ────────────────────────────────

/// POST /api/v1/workers/{name}/connected
pub async fn worker_connected(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.registry.mark_connected(&name).await {
        info!(worker = %name, "worker reported connected");
        ApiResponse::ok("connected").into_response()
    } else {
        error_response("worker not found", StatusCode::NOT_FOUND).into_response()
    }
}

/// POST /api/v1/workers/{name}/idle
pub async fn worker_idle(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.registry.mark_idle(&name).await {
        debug!(worker = %name, "worker reported idle");
        ApiResponse::ok("idle").into_response()
    } else {
        error_response("worker not found", StatusCode::NOT_FOUND).into_response()
    }
}

/// POST /api/v1/workers/{name}/busy
pub async fn worker_busy(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.registry.mark_busy(&name).await {
        debug!(worker = %name, "worker reported busy");
        ApiResponse::ok("busy").into_response()
    } else {
        error_response("worker not found", StatusCode::NOT_FOUND).into_response()
    }
}

// ── Operations ─────────────────────────────────────────────────

/// POST /api/v1/reconcile
pub async fn reconcile_now(State(state): State<ApiState>) -> impl IntoResponse {
    state.monitor.reconcile_all().await;
    ApiResponse::ok(state.monitor.snapshots().await).into_response()
}

#[derive(serde::Serialize)]
pub struct StatusReport {
    pub draining: bool,
    pub workers: usize,
    pub counters: CounterSnapshot,
    pub profiles: Vec<ClusterSnapshot>,
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    // Copy the flag out so the non-Send watch guard drops before the awaits.
    let draining = *state.drain.borrow();
    let report = StatusReport {
        draining,
        workers: state.registry.len().await,
        counters: state.counters.snapshot(),
        profiles: state.monitor.snapshots().await,
    };
    ApiResponse::ok(report).into_response()
}

/// Audit query options.
#[derive(serde::Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/audit
pub async fn recent_audit(
    State(state): State<ApiState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    ApiResponse::ok(state.audit.recent(limit).await).into_response()
}

/// POST /api/v1/drain
pub async fn drain(State(state): State<ApiState>) -> impl IntoResponse {
    state.drain.send_replace(true);
    info!("drain requested");
    ApiResponse::ok(serde_json::json!({ "draining": true })).into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let mut profiles = Vec::with_capacity(state.controllers.len());
    let mut templates = Vec::new();
    for (name, controller) in state.controllers.iter() {
        let profile = controller.profile();
        let healthy = state
            .monitor
            .snapshot(name)
            .await
            .map(|snapshot| snapshot.healthy)
            .unwrap_or(true);
        profiles.push(ProfileGauge {
            profile: name.clone(),
            workers: state.registry.profile_count(name),
            max_workers: profile.max_workers,
            healthy,
        });
        for template in &profile.templates {
            let resolved = forge_template::resolve(template, profile);
            templates.push(TemplateGauge {
                profile: name.clone(),
                template: template.name.clone(),
                instances: state.registry.template_count(name, &template.name),
                max_instances: resolved.max_instances,
            });
        }
    }

    let body = render_prometheus(&state.counters.snapshot(), &profiles, &templates);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
