//! Prometheus text exposition format.
//!
//! Renders counter snapshots and capacity gauges into the text
//! exposition format for scraping.

use crate::counters::CounterSnapshot;

/// Capacity gauge for one profile.
#[derive(Debug, Clone)]
pub struct ProfileGauge {
    pub profile: String,
    pub workers: u32,
    pub max_workers: u32,
    pub healthy: bool,
}

/// Capacity gauge for one template.
#[derive(Debug, Clone)]
pub struct TemplateGauge {
    pub profile: String,
    pub template: String,
    pub instances: u32,
    pub max_instances: Option<u32>,
}

/// Render counters and gauges into Prometheus text format.
pub fn render_prometheus(
    counters: &CounterSnapshot,
    profiles: &[ProfileGauge],
    templates: &[TemplateGauge],
) -> String {
    let mut out = String::new();

    let totals: [(&str, &str, u64); 7] = [
        ("forge_provisions_total", "Workers provisioned.", counters.provisions_total),
        (
            "forge_provision_failures_total",
            "Provisioning attempts that exhausted their retries.",
            counters.provision_failures_total,
        ),
        (
            "forge_rate_limited_total",
            "Capacity decisions denied by the rate limiter.",
            counters.rate_limited_total,
        ),
        (
            "forge_connect_timeouts_total",
            "Workers that never established their control channel.",
            counters.connect_timeouts_total,
        ),
        ("forge_terminations_total", "Workers terminated.", counters.terminations_total),
        (
            "forge_reconcile_cycles_total",
            "Completed reconciliation cycles.",
            counters.reconcile_cycles_total,
        ),
        (
            "forge_reconcile_failures_total",
            "Reconciliation cycles that failed for a profile.",
            counters.reconcile_failures_total,
        ),
    ];
    for (name, help, value) in totals {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} counter\n"));
        out.push_str(&format!("{name} {value}\n"));
    }

    out.push_str("# HELP forge_profile_workers Live workers per profile.\n");
    out.push_str("# TYPE forge_profile_workers gauge\n");
    for p in profiles {
        out.push_str(&format!(
            "forge_profile_workers{{profile=\"{}\"}} {}\n",
            p.profile, p.workers
        ));
    }

    out.push_str("# HELP forge_profile_max_workers Configured worker cap per profile.\n");
    out.push_str("# TYPE forge_profile_max_workers gauge\n");
    for p in profiles {
        out.push_str(&format!(
            "forge_profile_max_workers{{profile=\"{}\"}} {}\n",
            p.profile, p.max_workers
        ));
    }

    out.push_str("# HELP forge_profile_healthy Whether the last reconciliation succeeded.\n");
    out.push_str("# TYPE forge_profile_healthy gauge\n");
    for p in profiles {
        out.push_str(&format!(
            "forge_profile_healthy{{profile=\"{}\"}} {}\n",
            p.profile,
            if p.healthy { 1 } else { 0 }
        ));
    }

    out.push_str("# HELP forge_template_instances Live instances per template.\n");
    out.push_str("# TYPE forge_template_instances gauge\n");
    for t in templates {
        out.push_str(&format!(
            "forge_template_instances{{profile=\"{}\",template=\"{}\"}} {}\n",
            t.profile, t.template, t.instances
        ));
    }

    out.push_str("# HELP forge_template_max_instances Configured instance cap per template.\n");
    out.push_str("# TYPE forge_template_max_instances gauge\n");
    for t in templates {
        if let Some(max) = t.max_instances {
            out.push_str(&format!(
                "forge_template_max_instances{{profile=\"{}\",template=\"{}\"}} {}\n",
                t.profile, t.template, max
            ));
        }
    }

    out
}
