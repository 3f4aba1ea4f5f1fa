//! Workload and cluster state reported by the orchestrator.

use forge_config::quantity::{MemoryBytes, Millicores};
use serde::{Deserialize, Serialize};

/// Orchestrator-assigned identity of a created workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadHandle {
    pub id: String,
}

impl WorkloadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Label selector identifying workloads owned by this controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerTags {
    pub profile: String,
}

impl OwnerTags {
    pub fn for_profile(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }
}

/// State of one execution unit backing a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Running,
    Pending,
    Complete,
    Shutdown,
    Failed,
    Stopped,
    Unknown,
}

impl UnitState {
    /// Classification priority; higher wins when a workload's units
    /// disagree.
    fn priority(self) -> u8 {
        match self {
            Self::Running => 6,
            Self::Pending => 5,
            Self::Complete => 4,
            Self::Shutdown => 3,
            Self::Failed => 2,
            Self::Stopped => 1,
            Self::Unknown => 0,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Pending)
    }
}

/// Collapse per-unit states into one workload state.
///
/// Priority order: running > pending > complete > shutdown > failed >
/// stopped > unknown. A workload with no units is `Unknown`.
pub fn classify(units: &[UnitState]) -> UnitState {
    units
        .iter()
        .copied()
        .max_by_key(|state| state.priority())
        .unwrap_or(UnitState::Unknown)
}

/// One controller-owned workload as listed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub handle: WorkloadHandle,
    pub name: String,
    /// Owning template name, from the workload's owner tags.
    pub template: Option<String>,
    pub units: Vec<UnitState>,
}

impl WorkloadInfo {
    pub fn state(&self) -> UnitState {
        classify(&self.units)
    }
}

/// One cluster node as reported by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub hostname: String,
    pub ready: bool,
    pub cpu: Millicores,
    pub memory: MemoryBytes,
}

/// Aggregate cluster resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes: Vec<NodeSummary>,
}

impl ClusterSummary {
    pub fn ready_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.ready).count()
    }

    pub fn total_cpu(&self) -> Millicores {
        Millicores(self.nodes.iter().map(|n| n.cpu.0).sum())
    }

    pub fn total_memory(&self) -> MemoryBytes {
        MemoryBytes(self.nodes.iter().map(|n| n.memory.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_beats_everything() {
        let units = [
            UnitState::Failed,
            UnitState::Running,
            UnitState::Shutdown,
            UnitState::Unknown,
        ];
        assert_eq!(classify(&units), UnitState::Running);
    }

    #[test]
    fn pending_beats_terminal_states() {
        let units = [UnitState::Complete, UnitState::Pending, UnitState::Failed];
        assert_eq!(classify(&units), UnitState::Pending);
    }

    #[test]
    fn failed_beats_stopped_and_unknown() {
        let units = [UnitState::Unknown, UnitState::Stopped, UnitState::Failed];
        assert_eq!(classify(&units), UnitState::Failed);
    }

    #[test]
    fn no_units_is_unknown() {
        assert_eq!(classify(&[]), UnitState::Unknown);
    }

    #[test]
    fn live_states() {
        assert!(UnitState::Running.is_live());
        assert!(UnitState::Pending.is_live());
        assert!(!UnitState::Complete.is_live());
        assert!(!UnitState::Failed.is_live());
    }

    #[test]
    fn summary_totals() {
        let summary = ClusterSummary {
            nodes: vec![
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
                    cpu: Millicores::from_cores(4),
                    memory: MemoryBytes::from_mib(8 * 1024),
                },
            ],
        };
        assert_eq!(summary.ready_nodes(), 1);
        assert_eq!(summary.total_cpu(), Millicores::from_cores(12));
        assert_eq!(summary.total_memory(), MemoryBytes::from_mib(24 * 1024));
    }
}
