//! forge-registry: worker bookkeeping and instance accounting.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 forge-registry                 │
//! │                                                │
//! │  WorkerRegistry ── name → WorkerRecord         │
//! │       │            lifecycle state per worker  │
//! │       └─ InstanceCounter per (profile,         │
//! │          template): atomic, overwritable       │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Instance counters are the capacity-accounting source of truth
//! between reconciliation cycles. They are plain atomics so that
//! capacity decisions, provisioning completions and the monitor's
//! authoritative overwrites interleave without holding a lock across
//! any slow operation.

pub mod counter;
pub mod registry;
pub mod types;

pub use counter::InstanceCounter;
pub use registry::WorkerRegistry;
pub use types::{AgentState, WorkerRecord};
