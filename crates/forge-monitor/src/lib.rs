//! forge-monitor: reconciliation against the cluster's ground truth.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  forge-monitor                   │
//! │                                                  │
//! │  every interval, per profile:                    │
//! │                                                  │
//! │   list_workloads ──► group by template           │
//! │         │                  │                     │
//! │         │                  ▼                     │
//! │         │        counter.store(observed)         │
//! │         ▼                                        │
//! │   cluster_summary ──► ClusterSnapshot            │
//! │                       (nodes, counts, states)    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Instance counters drift: workloads get removed out of band, the
//! orchestrator evicts them, or the controller crashes between a
//! removal and its decrement. The monitor periodically overwrites each
//! counter with the count the orchestrator actually reports, and
//! publishes a per-profile [`ClusterSnapshot`] for the status surface.
//! One profile's collection failure degrades that profile's snapshot
//! only; the others still reconcile.

pub mod monitor;
pub mod snapshot;

pub use monitor::{ProfileTarget, ReconciliationMonitor};
pub use snapshot::{ClusterSnapshot, WorkloadStatus};
