//! In-memory orchestrator.
//!
//! Backs standalone mode and tests. Holds created workloads in a map,
//! supports fault injection (failing the next N create or list calls)
//! and artificial create latency, and lets callers mutate unit states
//! out of band to simulate cluster-side drift.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::spec::{OWNER_VALUE, TAG_OWNER, TAG_PROFILE, TAG_TEMPLATE, WorkloadSpec};
use crate::state::{ClusterSummary, NodeSummary, OwnerTags, UnitState, WorkloadHandle, WorkloadInfo};
use crate::{OrchestratorGateway, RemoveOutcome};

/// One workload held by the simulator.
#[derive(Debug, Clone)]
pub struct SimWorkload {
    pub handle: WorkloadHandle,
    pub name: String,
    pub spec: WorkloadSpec,
    pub callback_url: String,
    pub units: Vec<UnitState>,
    pub logs: String,
}

/// In-memory [`OrchestratorGateway`] implementation.
#[derive(Debug, Default)]
pub struct SimGateway {
    workloads: RwLock<HashMap<String, SimWorkload>>,
    nodes: RwLock<Vec<NodeSummary>>,
    seq: AtomicU64,
    create_calls: AtomicU64,
    fail_creates: AtomicU32,
    fail_lists: AtomicU32,
    create_delay_ms: AtomicU64,
}

impl SimGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` create calls with an unreachable error.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` list calls with an unreachable error.
    pub fn fail_next_lists(&self, n: u32) {
        self.fail_lists.store(n, Ordering::SeqCst);
    }

    /// Delay every create call, simulating orchestrator latency.
    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total create calls observed, including failed ones.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub async fn set_nodes(&self, nodes: Vec<NodeSummary>) {
        *self.nodes.write().await = nodes;
    }

    pub async fn count(&self) -> usize {
        self.workloads.read().await.len()
    }

    pub async fn get(&self, name: &str) -> Option<SimWorkload> {
        self.workloads.read().await.values().find(|w| w.name == name).cloned()
    }

    /// Overwrite a workload's unit states, simulating cluster drift.
    pub async fn set_units(&self, name: &str, units: Vec<UnitState>) -> bool {
        let mut workloads = self.workloads.write().await;
        match workloads.values_mut().find(|w| w.name == name) {
            Some(workload) => {
                workload.units = units;
                true
            }
            None => false,
        }
    }

    /// Remove a workload without the controller's involvement,
    /// simulating out-of-band deletion.
    pub async fn drop_workload(&self, name: &str) -> bool {
        let mut workloads = self.workloads.write().await;
        let key = workloads
            .iter()
            .find(|(_, w)| w.name == name)
            .map(|(k, _)| k.clone());
        match key {
            Some(key) => {
                workloads.remove(&key);
                true
            }
            None => false,
        }
    }

    pub async fn append_logs(&self, name: &str, line: &str) -> bool {
        let mut workloads = self.workloads.write().await;
        match workloads.values_mut().find(|w| w.name == name) {
            Some(workload) => {
                workload.logs.push_str(line);
                workload.logs.push('\n');
                true
            }
            None => false,
        }
    }
}

/// Consume one unit from an injected-failure counter.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OrchestratorGateway for SimGateway {
    async fn create_workload(
        &self,
        name: &str,
        spec: &WorkloadSpec,
        callback_url: &str,
    ) -> GatewayResult<WorkloadHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if take_one(&self.fail_creates) {
            return Err(GatewayError::Unreachable("injected create fault".to_string()));
        }

        let mut workloads = self.workloads.write().await;
        if workloads.values().any(|w| w.name == name) {
            return Err(GatewayError::Rejected(format!(
                "workload name '{name}' already in use"
            )));
        }

        let id = format!("sim-{}", self.seq.fetch_add(1, Ordering::SeqCst));
        let handle = WorkloadHandle::new(id.clone());
        workloads.insert(
            id,
            SimWorkload {
                handle: handle.clone(),
                name: name.to_string(),
                spec: spec.clone(),
                callback_url: callback_url.to_string(),
                units: vec![UnitState::Running],
                logs: String::new(),
            },
        );
        debug!(workload = %name, handle = %handle.id, "sim workload created");
        Ok(handle)
    }

    async fn remove_workload(&self, handle: &WorkloadHandle) -> GatewayResult<RemoveOutcome> {
        let mut workloads = self.workloads.write().await;
        match workloads.remove(&handle.id) {
            Some(workload) => {
                debug!(workload = %workload.name, handle = %handle.id, "sim workload removed");
                Ok(RemoveOutcome::Removed)
            }
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn list_workloads(&self, owner: &OwnerTags) -> GatewayResult<Vec<WorkloadInfo>> {
        if take_one(&self.fail_lists) {
            return Err(GatewayError::Unreachable("injected list fault".to_string()));
        }
        let workloads = self.workloads.read().await;
        let mut listed: Vec<WorkloadInfo> = workloads
            .values()
            .filter(|w| {
                w.spec.tags.get(TAG_OWNER).map(String::as_str) == Some(OWNER_VALUE)
                    && w.spec.tags.get(TAG_PROFILE).map(String::as_str)
                        == Some(owner.profile.as_str())
            })
            .map(|w| WorkloadInfo {
                handle: w.handle.clone(),
                name: w.name.clone(),
                template: w.spec.tags.get(TAG_TEMPLATE).cloned(),
                units: w.units.clone(),
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn fetch_logs(&self, handle: &WorkloadHandle, tail_lines: u32) -> GatewayResult<String> {
        let workloads = self.workloads.read().await;
        let workload = workloads
            .get(&handle.id)
            .ok_or_else(|| GatewayError::NotFound(handle.id.clone()))?;
        let lines: Vec<&str> = workload.logs.lines().collect();
        let start = lines.len().saturating_sub(tail_lines as usize);
        Ok(lines[start..].join("\n"))
    }

    async fn cluster_summary(&self) -> GatewayResult<ClusterSummary> {
        Ok(ClusterSummary {
            nodes: self.nodes.read().await.clone(),
        })
    }
}
