//! Single-hop template merge.

use forge_config::types::{AgentTemplate, FleetProfile};
use tracing::warn;

/// Materialize a template against its declared parent.
///
/// Without `inherit_from` the template is returned as-is. A named
/// parent that does not exist also yields the template as-is, with a
/// warning; resolution never blocks provisioning on a dangling
/// reference. The merge is single hop: the parent is used exactly as
/// declared, its own `inherit_from` is not followed.
pub fn resolve(template: &AgentTemplate, profile: &FleetProfile) -> AgentTemplate {
    let Some(parent_name) = template.inherit_from.as_deref() else {
        return template.clone();
    };
    let Some(parent) = profile.template(parent_name) else {
        warn!(
            profile = %profile.name,
            template = %template.name,
            parent = %parent_name,
            "parent template not found, resolving as-is"
        );
        return template.clone();
    };
    merge(parent, template)
}

fn merge(parent: &AgentTemplate, child: &AgentTemplate) -> AgentTemplate {
    AgentTemplate {
        name: child.name.clone(),
        labels: union_labels(&parent.labels, &child.labels),
        inherit_from: child.inherit_from.clone(),

        image: child.image.clone().or_else(|| parent.image.clone()),
        command: child.command.clone().or_else(|| parent.command.clone()),
        working_dir: child.working_dir.clone().or_else(|| parent.working_dir.clone()),
        executors: child.executors.or(parent.executors),
        max_instances: child.max_instances.or(parent.max_instances),
        mode: child.mode.or(parent.mode),
        cpu_limit: child.cpu_limit.or(parent.cpu_limit),
        cpu_reservation: child.cpu_reservation.or(parent.cpu_reservation),
        memory_limit: child.memory_limit.or(parent.memory_limit),
        memory_reservation: child.memory_reservation.or(parent.memory_reservation),
        user: child.user.clone().or_else(|| parent.user.clone()),
        hostname: child.hostname.clone().or_else(|| parent.hostname.clone()),
        stop_signal: child.stop_signal.clone().or_else(|| parent.stop_signal.clone()),
        stop_grace_secs: child.stop_grace_secs.or(parent.stop_grace_secs),
        health_check: child
            .health_check
            .clone()
            .or_else(|| parent.health_check.clone()),
        apparmor_profile: child
            .apparmor_profile
            .clone()
            .or_else(|| parent.apparmor_profile.clone()),
        seccomp_profile: child
            .seccomp_profile
            .clone()
            .or_else(|| parent.seccomp_profile.clone()),
        connect_timeout_secs: child.connect_timeout_secs.or(parent.connect_timeout_secs),
        idle_timeout_secs: child.idle_timeout_secs.or(parent.idle_timeout_secs),
        retry_count: child.retry_count.or(parent.retry_count),
        retry_delay_ms: child.retry_delay_ms.or(parent.retry_delay_ms),

        mounts: append(&parent.mounts, &child.mounts),
        env: append(&parent.env, &child.env),
        secrets: append(&parent.secrets, &child.secrets),
        configs: append(&parent.configs, &child.configs),
        cache_dirs: append(&parent.cache_dirs, &child.cache_dirs),
        constraints: append(&parent.constraints, &child.constraints),
        networks: append(&parent.networks, &child.networks),
        cap_add: append(&parent.cap_add, &child.cap_add),
        cap_drop: append(&parent.cap_drop, &child.cap_drop),
        sysctls: append(&parent.sysctls, &child.sysctls),
        dns_servers: append(&parent.dns_servers, &child.dns_servers),
        dns_options: append(&parent.dns_options, &child.dns_options),
        dns_search: append(&parent.dns_search, &child.dns_search),
        generic_resources: append(&parent.generic_resources, &child.generic_resources),
        ports: append(&parent.ports, &child.ports),

        privileged: child.privileged || parent.privileged,
    }
}

/// Parent tokens in order, then child tokens not already present.
fn union_labels(parent: &str, child: &str) -> String {
    let mut tokens: Vec<&str> = parent.split_whitespace().collect();
    for token in child.split_whitespace() {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens.join(" ")
}

/// Parent list followed by child list, duplicates preserved.
fn append<T: Clone>(parent: &[T], child: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(parent.len() + child.len());
    out.extend_from_slice(parent);
    out.extend_from_slice(child);
    out
}
