//! Audit event ring.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Provisioned,
    ProvisionFailed,
    Terminated,
}

/// Why a worker was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    IdleTimeout,
    Manual,
    ConnectionLost,
    ProfileMissing,
    Drain,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle timeout",
            Self::Manual => "manual",
            Self::ConnectionLost => "connection lost",
            Self::ProfileMissing => "owning profile missing",
            Self::Drain => "shutdown drain",
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Seconds since the Unix epoch.
    pub at: u64,
    pub kind: AuditKind,
    pub profile: String,
    pub template: String,
    pub worker: String,
    /// Error text for failures, reason text for terminations.
    pub detail: String,
}

/// Fixed-capacity audit trail. Oldest events fall off the front.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record(&self, event: AuditEvent) {
        info!(
            kind = ?event.kind,
            profile = %event.profile,
            template = %event.template,
            worker = %event.worker,
            detail = %event.detail,
            "audit event"
        );
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub async fn provisioned(&self, profile: &str, template: &str, worker: &str) {
        self.record(AuditEvent {
            at: epoch_secs(),
            kind: AuditKind::Provisioned,
            profile: profile.to_string(),
            template: template.to_string(),
            worker: worker.to_string(),
            detail: String::new(),
        })
        .await;
    }

    pub async fn provision_failed(&self, profile: &str, template: &str, worker: &str, error: &str) {
        self.record(AuditEvent {
            at: epoch_secs(),
            kind: AuditKind::ProvisionFailed,
            profile: profile.to_string(),
            template: template.to_string(),
            worker: worker.to_string(),
            detail: error.to_string(),
        })
        .await;
    }

    pub async fn terminated(
        &self,
        profile: &str,
        template: &str,
        worker: &str,
        reason: TerminationReason,
    ) {
        self.record(AuditEvent {
            at: epoch_secs(),
            kind: AuditKind::Terminated,
            profile: profile.to_string(),
            template: template.to_string(),
            worker: worker.to_string(),
            detail: reason.as_str().to_string(),
        })
        .await;
    }

    /// The most recent `n` events, newest first.
    pub async fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(n).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back() {
        let log = AuditLog::new(16);
        log.provisioned("prod", "maven", "maven-1").await;
        log.provision_failed("prod", "maven", "maven-2", "orchestrator unreachable").await;
        log.terminated("prod", "maven", "maven-1", TerminationReason::IdleTimeout).await;

        assert_eq!(log.len().await, 3);
        let recent = log.recent(10).await;
        // Newest first.
        assert_eq!(recent[0].kind, AuditKind::Terminated);
        assert_eq!(recent[0].detail, "idle timeout");
        assert_eq!(recent[1].kind, AuditKind::ProvisionFailed);
        assert_eq!(recent[1].detail, "orchestrator unreachable");
        assert_eq!(recent[2].kind, AuditKind::Provisioned);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let log = AuditLog::new(2);
        log.provisioned("prod", "maven", "maven-1").await;
        log.provisioned("prod", "maven", "maven-2").await;
        log.provisioned("prod", "maven", "maven-3").await;

        assert_eq!(log.len().await, 2);
        let recent = log.recent(10).await;
        assert_eq!(recent[0].worker, "maven-3");
        assert_eq!(recent[1].worker, "maven-2");
    }

    #[tokio::test]
    async fn recent_limits_count() {
        let log = AuditLog::new(16);
        for n in 0..5 {
            log.provisioned("prod", "maven", &format!("maven-{n}")).await;
        }
        assert_eq!(log.recent(2).await.len(), 2);
        assert_eq!(log.recent(0).await.len(), 0);
    }
}
