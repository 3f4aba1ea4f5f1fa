//! forge-metrics: controller counters and their exposition.
//!
//! `FleetCounters` is a set of process-lifetime atomic counters bumped
//! from the hot paths; `prometheus` renders them, together with
//! point-in-time capacity gauges, into the text exposition format.

pub mod counters;
pub mod prometheus;

pub use counters::{CounterSnapshot, FleetCounters};
pub use prometheus::{ProfileGauge, TemplateGauge, render_prometheus};
