//! forge-provisioner: capacity decisions and worker provisioning.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                forge-provisioner                 │
//! │                                                  │
//! │  capacity ── CapacityController                  │
//! │      │       demand → bounded dispatch           │
//! │      ▼                                           │
//! │  executor ── one async attempt per unit,         │
//! │      │       retry with capped backoff           │
//! │      ▼                                           │
//! │  lifecycle ─ connection watch, termination,      │
//! │              idle reaping                        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! One `CapacityController` exists per fleet profile. Its decision
//! path is synchronous and lock-light; everything slow happens in
//! spawned executor tasks that report back through the registry, the
//! audit trail and the counters.

pub mod capacity;
pub mod error;
pub mod executor;
pub mod lifecycle;

pub use capacity::{CapacityController, ProvisionHandle};
pub use error::{ProvisionError, ProvisionResult};
pub use lifecycle::terminate_worker;
