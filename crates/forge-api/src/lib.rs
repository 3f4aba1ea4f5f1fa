//! forge-api: REST API for the fleet controller.
//!
//! Provides axum route handlers for inspecting profiles, templates and
//! workers, submitting demand by hand, receiving scheduler/agent
//! signals, and operating the controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/profiles` | List profiles with capacity usage |
//! | GET | `/api/v1/profiles/{name}` | Profile detail with templates |
//! | GET | `/api/v1/profiles/{name}/templates` | Templates with instance counts |
//! | POST | `/api/v1/profiles/{name}/provision` | Submit a demand signal by hand |
//! | GET | `/api/v1/workers` | List workers |
//! | GET | `/api/v1/workers/{name}` | Worker detail |
//! | DELETE | `/api/v1/workers/{name}` | Terminate a worker |
//! | POST | `/api/v1/workers/{name}/connected` | Agent control channel is up |
//! | POST | `/api/v1/workers/{name}/idle` | Scheduler reports no work |
//! | POST | `/api/v1/workers/{name}/busy` | Scheduler assigned work |
//! | POST | `/api/v1/reconcile` | Run a reconciliation cycle now |
//! | GET | `/api/v1/status` | Snapshots, worker totals, counters |
//! | GET | `/api/v1/audit` | Recent audit events |
//! | POST | `/api/v1/drain` | Stop accepting new capacity |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use forge_audit::AuditLog;
use forge_metrics::FleetCounters;
use forge_monitor::ReconciliationMonitor;
use forge_provisioner::CapacityController;
use forge_registry::WorkerRegistry;
use tokio::sync::watch;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Capacity controllers keyed by profile name.
    pub controllers: Arc<BTreeMap<String, Arc<CapacityController>>>,
    pub registry: Arc<WorkerRegistry>,
    pub monitor: Arc<ReconciliationMonitor>,
    pub audit: Arc<AuditLog>,
    pub counters: Arc<FleetCounters>,
    /// Drain signal; flipping it stops new capacity decisions.
    pub drain: Arc<watch::Sender<bool>>,
}

/// Build the complete API router (REST + metrics + liveness).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/profiles", get(handlers::list_profiles))
        .route("/profiles/{name}", get(handlers::get_profile))
        .route("/profiles/{name}/templates", get(handlers::profile_templates))
        .route("/profiles/{name}/provision", post(handlers::provision))
        .route("/workers", get(handlers::list_workers))
        .route(
            "/workers/{name}",
            get(handlers::get_worker).delete(handlers::delete_worker),
        )
        .route("/workers/{name}/connected", post(handlers::worker_connected))
        .route("/workers/{name}/idle", post(handlers::worker_idle))
        .route("/workers/{name}/busy", post(handlers::worker_busy))
        .route("/reconcile", post(handlers::reconcile_now))
        .route("/status", get(handlers::status))
        .route("/audit", get(handlers::recent_audit))
        .route("/drain", post(handlers::drain))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
        .route("/healthz", get(handlers::healthz))
}
