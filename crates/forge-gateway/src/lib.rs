//! forge-gateway: the orchestrator capability interface.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 forge-gateway                  │
//! │                                                │
//! │  OrchestratorGateway ── create / remove /      │
//! │        (trait)          list / logs / summary  │
//! │                                                │
//! │  spec ──── WorkloadSpec mapping from a         │
//! │            resolved template                   │
//! │  state ─── unit states, classification,        │
//! │            cluster summaries                   │
//! │  sim ───── in-memory gateway with fault        │
//! │            injection                           │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The controller drives any container orchestrator through this
//! narrow interface. It never schedules containers onto machines
//! itself; it only asks for workloads to exist or stop existing and
//! reads back what the cluster actually runs.

pub mod error;
pub mod sim;
pub mod spec;
pub mod state;

use async_trait::async_trait;

pub use error::{GatewayError, GatewayResult};
pub use sim::SimGateway;
pub use spec::WorkloadSpec;
pub use state::{ClusterSummary, NodeSummary, OwnerTags, UnitState, WorkloadHandle, WorkloadInfo};

/// Result of a remove call. A workload that is already gone counts as
/// removed; callers treat both variants as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Capability interface over a container orchestrator.
#[async_trait]
pub trait OrchestratorGateway: Send + Sync {
    /// Create one workload running the given spec. The worker is
    /// expected to dial back on `callback_url` once its process is up.
    async fn create_workload(
        &self,
        name: &str,
        spec: &WorkloadSpec,
        callback_url: &str,
    ) -> GatewayResult<WorkloadHandle>;

    /// Remove a workload. Absence is reported, not an error.
    async fn remove_workload(&self, handle: &WorkloadHandle) -> GatewayResult<RemoveOutcome>;

    /// List workloads carrying this controller's owner tags.
    async fn list_workloads(&self, owner: &OwnerTags) -> GatewayResult<Vec<WorkloadInfo>>;

    /// Fetch the last `tail_lines` of a workload's output, for
    /// diagnostics when a worker never connects.
    async fn fetch_logs(&self, handle: &WorkloadHandle, tail_lines: u32) -> GatewayResult<String>;

    /// Node inventory and resource totals.
    async fn cluster_summary(&self) -> GatewayResult<ClusterSummary>;
}
