//! Worker record and lifecycle states.

use forge_gateway::WorkloadHandle;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one provisioned worker.
///
/// Normal path: `Provisioning → Connecting → Active → Idle →
/// Terminating → Removed`. `FailedConnect` is terminal for workers
/// whose control channel never came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Provisioning,
    Connecting,
    Active,
    Idle,
    Terminating,
    Removed,
    FailedConnect,
}

impl AgentState {
    /// Whether the worker still occupies cluster capacity.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Removed | Self::FailedConnect)
    }
}

/// Bookkeeping for one provisioned worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Generated unique name, also the workload name on the cluster.
    pub name: String,
    /// Orchestrator-assigned handle.
    pub handle: WorkloadHandle,
    pub profile: String,
    pub template: String,
    /// Concurrent build executors this worker offers.
    pub executors: u32,
    pub created_at: u64,
    pub state: AgentState,
    pub state_changed_at: u64,
    /// Set while the worker is idle; drives the idle-timeout reaper.
    pub idle_since: Option<u64>,
}

impl WorkerRecord {
    pub fn new(
        name: impl Into<String>,
        handle: WorkloadHandle,
        profile: impl Into<String>,
        template: impl Into<String>,
        executors: u32,
    ) -> Self {
        let now = epoch_secs();
        Self {
            name: name.into(),
            handle,
            profile: profile.into(),
            template: template.into(),
            executors,
            created_at: now,
            state: AgentState::Provisioning,
            state_changed_at: now,
            idle_since: None,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
