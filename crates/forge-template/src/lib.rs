//! forge-template: template inheritance resolution and label matching.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               forge-template                 │
//! │                                              │
//! │  merge ──── resolve(template, profile)       │
//! │             single-hop parent merge          │
//! │                                              │
//! │  matching ─ serves(template, demand label)   │
//! │             declaration-order selection      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Resolution materializes a template against its declared parent:
//! override fields fall back to the parent when the child leaves them
//! unset, list fields append parent-then-child, labels form a token
//! union and privilege can only be added. The output is ephemeral; it
//! is recomputed for every provisioning attempt so that parent edits
//! take effect without restarts.

pub mod matching;
pub mod merge;

pub use matching::{first_match, serves};
pub use merge::resolve;
