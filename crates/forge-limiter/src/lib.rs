//! forge-limiter: per-profile provisioning throughput guard.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 forge-limiter                │
//! │                                              │
//! │  ProvisionRateLimiter                        │
//! │    ├─ trailing-window provision count        │
//! │    ├─ minimum inter-provision spacing        │
//! │    └─ failure-escalated backoff              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Protects the orchestrator and the job scheduler from provisioning
//! storms when many jobs queue at once. State is process-local: a
//! restart starts with an empty window and no backoff.

pub mod limiter;

pub use limiter::{PROVISION_WINDOW, ProvisionRateLimiter};
