//! Per-profile cluster snapshots.

use std::collections::BTreeMap;

use forge_config::quantity::{MemoryBytes, Millicores};
use forge_gateway::{ClusterSummary, UnitState, WorkloadInfo};
use forge_registry::types::epoch_secs;
use serde::Serialize;

/// One owned workload with its classified state.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadStatus {
    pub name: String,
    /// Owning template, absent when the workload carries no template
    /// tag.
    pub template: Option<String>,
    pub state: UnitState,
}

/// What one reconciliation cycle observed for one profile.
///
/// Rebuilt from scratch every cycle; a degraded snapshot replaces the
/// previous one rather than letting stale data pass for fresh.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub profile: String,
    /// Seconds since the Unix epoch at collection time.
    pub taken_at: u64,
    pub healthy: bool,
    /// Collection error when `healthy` is false.
    pub error: Option<String>,
    pub nodes_total: usize,
    pub nodes_ready: usize,
    pub cpu_total: Millicores,
    pub memory_total: MemoryBytes,
    /// Observed workload count per template tag.
    pub template_counts: BTreeMap<String, u32>,
    pub workloads: Vec<WorkloadStatus>,
}

impl ClusterSnapshot {
    /// Build a healthy snapshot from one profile's collected state.
    pub fn collected(
        profile: impl Into<String>,
        summary: &ClusterSummary,
        listed: &[WorkloadInfo],
        template_counts: BTreeMap<String, u32>,
    ) -> Self {
        let workloads = listed
            .iter()
            .map(|workload| WorkloadStatus {
                name: workload.name.clone(),
                template: workload.template.clone(),
                state: workload.state(),
            })
            .collect();
        Self {
            profile: profile.into(),
            taken_at: epoch_secs(),
            healthy: true,
            error: None,
            nodes_total: summary.nodes.len(),
            nodes_ready: summary.ready_nodes(),
            cpu_total: summary.total_cpu(),
            memory_total: summary.total_memory(),
            template_counts,
            workloads,
        }
    }

    /// Build the snapshot recorded when collection fails.
    pub fn degraded(profile: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            taken_at: epoch_secs(),
            healthy: false,
            error: Some(error.into()),
            nodes_total: 0,
            nodes_ready: 0,
            cpu_total: Millicores(0),
            memory_total: MemoryBytes(0),
            template_counts: BTreeMap::new(),
            workloads: Vec::new(),
        }
    }

    /// Workloads currently running or starting.
    pub fn live_workloads(&self) -> usize {
        self.workloads
            .iter()
            .filter(|status| status.state.is_live())
            .count()
    }
}
