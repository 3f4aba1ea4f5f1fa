//! Shared worker registry.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::counter::InstanceCounter;
use crate::types::{AgentState, WorkerRecord, epoch_secs};

/// Registry of provisioned workers plus per-template instance
/// counters.
///
/// Worker records live behind an async lock and are touched only by
/// cheap map operations. Counters are handed out as `Arc`s so callers
/// mutate them lock-free; the counter map itself is a sync lock
/// because lookups happen on the capacity-decision path.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerRecord>>,
    counters: StdRwLock<HashMap<(String, String), Arc<InstanceCounter>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Counters ──────────────────────────────────────────────────

    /// Counter for one (profile, template) pair, created on first use.
    pub fn counter(&self, profile: &str, template: &str) -> Arc<InstanceCounter> {
        let key = (profile.to_string(), template.to_string());
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(counters.entry(key).or_default())
    }

    /// Current count for a template without creating a counter.
    pub fn template_count(&self, profile: &str, template: &str) -> u32 {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(profile.to_string(), template.to_string()))
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Sum of all template counters for a profile.
    pub fn profile_count(&self, profile: &str) -> u32 {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((p, _), _)| p == profile)
            .map(|(_, c)| c.get())
            .sum()
    }

    /// Template names with a counter under this profile, with counts.
    pub fn template_counts(&self, profile: &str) -> Vec<(String, u32)> {
        let mut counts: Vec<(String, u32)> = self
            .counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((p, _), _)| p == profile)
            .map(|((_, t), c)| (t.clone(), c.get()))
            .collect();
        counts.sort();
        counts
    }

    // ── Worker records ────────────────────────────────────────────

    pub async fn register(&self, record: WorkerRecord) {
        debug!(worker = %record.name, profile = %record.profile, template = %record.template, "worker registered");
        self.workers.write().await.insert(record.name.clone(), record);
    }

    pub async fn get(&self, name: &str) -> Option<WorkerRecord> {
        self.workers.read().await.get(name).cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<WorkerRecord> {
        let removed = self.workers.write().await.remove(name);
        if removed.is_some() {
            debug!(worker = %name, "worker deregistered");
        }
        removed
    }

    /// Set a worker's lifecycle state. Returns `false` for unknown
    /// workers.
    pub async fn set_state(&self, name: &str, state: AgentState) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) => {
                debug!(worker = %name, from = ?record.state, to = ?state, "worker state change");
                record.state = state;
                record.state_changed_at = epoch_secs();
                true
            }
            None => false,
        }
    }

    /// Move a worker from `from` to `to`, only if it is still in
    /// `from`. Lets watchers advance a worker without clobbering a
    /// transition that raced ahead of them.
    pub async fn transition_if(&self, name: &str, from: AgentState, to: AgentState) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) if record.state == from => {
                record.state = to;
                record.state_changed_at = epoch_secs();
                true
            }
            _ => false,
        }
    }

    /// Control channel established: the worker is active.
    pub async fn mark_connected(&self, name: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) => {
                record.state = AgentState::Active;
                record.state_changed_at = epoch_secs();
                record.idle_since = None;
                true
            }
            None => false,
        }
    }

    /// Scheduler reports no work assigned. The idle timestamp is set
    /// on the transition and kept on repeat signals, so the timeout
    /// measures the full idle span.
    pub async fn mark_idle(&self, name: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) => {
                if record.state != AgentState::Idle {
                    record.state = AgentState::Idle;
                    record.state_changed_at = epoch_secs();
                    record.idle_since = Some(epoch_secs());
                }
                true
            }
            None => false,
        }
    }

    /// Scheduler assigned work again.
    pub async fn mark_busy(&self, name: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) => {
                record.state = AgentState::Active;
                record.state_changed_at = epoch_secs();
                record.idle_since = None;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// All workers, name-ordered.
    pub async fn workers(&self) -> Vec<WorkerRecord> {
        let mut all: Vec<WorkerRecord> = self.workers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn workers_for_profile(&self, profile: &str) -> Vec<WorkerRecord> {
        let mut matching: Vec<WorkerRecord> = self
            .workers
            .read()
            .await
            .values()
            .filter(|r| r.profile == profile)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }

    /// Idle workers of one profile, for the idle-timeout reaper.
    pub async fn idle_workers(&self, profile: &str) -> Vec<WorkerRecord> {
        self.workers
            .read()
            .await
            .values()
            .filter(|r| r.profile == profile && r.state == AgentState::Idle)
            .cloned()
            .collect()
    }
}
