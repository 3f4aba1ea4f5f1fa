//! Atomic per-template instance counter.

use std::sync::atomic::{AtomicU32, Ordering};

/// Count of live workers materialized from one template.
///
/// The counter may transiently exceed the template's `max_instances`
/// between a provisioning success and the next reconciliation cycle;
/// that is tolerated, not an error. It never goes below zero: a
/// decrement racing an authoritative overwrite saturates instead of
/// wrapping.
#[derive(Debug, Default)]
pub struct InstanceCounter(AtomicU32);

impl InstanceCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Saturating decrement; returns the new value.
    pub fn decrement(&self) -> u32 {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(n) => n - 1,
            Err(_) => 0,
        }
    }

    /// Authoritative overwrite from reconciliation.
    pub fn store(&self, value: u32) {
        self.0.store(value, Ordering::SeqCst);
    }
}
