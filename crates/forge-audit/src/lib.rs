//! forge-audit: bounded in-memory audit trail.
//!
//! Every provisioning success, provisioning failure and termination
//! lands here as a structured event. The trail is a fixed-capacity
//! ring; persistence is an external concern. Events never carry secret
//! values, only names and error text.

pub mod log;

pub use log::{AuditEvent, AuditKind, AuditLog, TerminationReason};
