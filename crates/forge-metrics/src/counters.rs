//! Process-lifetime controller counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters for controller activity. Cheap to bump from any
/// task; read as a consistent-enough snapshot for exposition.
#[derive(Debug, Default)]
pub struct FleetCounters {
    provisions: AtomicU64,
    provision_failures: AtomicU64,
    rate_limited: AtomicU64,
    connect_timeouts: AtomicU64,
    terminations: AtomicU64,
    reconcile_cycles: AtomicU64,
    reconcile_failures: AtomicU64,
}

impl FleetCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_provision(&self) {
        self.provisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provision_failure(&self) {
        self.provision_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_timeout(&self) {
        self.connect_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_termination(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_cycle(&self) {
        self.reconcile_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_failure(&self) {
        self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            provisions_total: self.provisions.load(Ordering::Relaxed),
            provision_failures_total: self.provision_failures.load(Ordering::Relaxed),
            rate_limited_total: self.rate_limited.load(Ordering::Relaxed),
            connect_timeouts_total: self.connect_timeouts.load(Ordering::Relaxed),
            terminations_total: self.terminations.load(Ordering::Relaxed),
            reconcile_cycles_total: self.reconcile_cycles.load(Ordering::Relaxed),
            reconcile_failures_total: self.reconcile_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub provisions_total: u64,
    pub provision_failures_total: u64,
    pub rate_limited_total: u64,
    pub connect_timeouts_total: u64,
    pub terminations_total: u64,
    pub reconcile_cycles_total: u64,
    pub reconcile_failures_total: u64,
}
