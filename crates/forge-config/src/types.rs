//! Domain types for the fleet configuration.
//!
//! A `FleetConfig` holds controller-wide settings plus one
//! `FleetProfile` per target orchestration cluster. Each profile owns
//! an ordered list of `AgentTemplate`s; template order matters because
//! capacity decisions pick the first template that serves a demand
//! label.
//!
//! Override-policy template fields are `Option<T>` so that "explicitly
//! set" is distinguishable from "inherit from the parent". Append-policy
//! fields are plain `Vec`s.

use serde::{Deserialize, Serialize};

use crate::quantity::{MemoryBytes, Millicores};

// ── Top level ─────────────────────────────────────────────────────

/// The complete fleet configuration, usually loaded from `fleet.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub profiles: Vec<FleetProfile>,
}

/// Controller-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// URL newly provisioned workers call back to establish their
    /// control channel.
    pub callback_url: String,
    /// Reconciliation cadence in seconds.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Poll interval while waiting for a worker's control channel.
    #[serde(default = "default_connect_poll_interval")]
    pub connect_poll_interval_secs: u64,
    /// Cadence of the idle-worker sweep.
    #[serde(default = "default_idle_sweep_interval")]
    pub idle_sweep_interval_secs: u64,
    /// Maximum retained audit events.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_connect_poll_interval() -> u64 {
    2
}

fn default_idle_sweep_interval() -> u64 {
    30
}

fn default_audit_capacity() -> usize {
    1024
}

// ── Profile ───────────────────────────────────────────────────────

/// Named configuration for one target orchestration cluster plus its
/// agent templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetProfile {
    /// Unique profile name.
    pub name: String,
    /// Orchestrator endpoint address.
    pub endpoint: String,
    /// Reference to externally stored credentials. The controller only
    /// ever handles the reference, never secret material.
    #[serde(default)]
    pub credentials: Option<String>,
    /// Maximum concurrent workers across all templates of this profile.
    pub max_workers: u32,
    /// Provisioning throughput bounds.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Retention policy fallback: workers idle longer than this are
    /// retired. Templates may override it; `None` disables reaping.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Ordered agent templates; names are unique within the profile.
    #[serde(default)]
    pub templates: Vec<AgentTemplate>,
}

impl FleetProfile {
    /// Look up a template by name.
    pub fn template(&self, name: &str) -> Option<&AgentTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }
}

/// Provisioning rate bounds for one profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Provisions allowed inside a trailing 60-second window.
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
    /// Minimum spacing between two provisions, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_max_per_minute() -> u32 {
    10
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: default_max_per_minute(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

// ── Template ──────────────────────────────────────────────────────

/// Usage mode of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Serves unlabeled demand as well as matching labels.
    #[default]
    Normal,
    /// Serves only demand whose labels match.
    Exclusive,
}

/// Named, inheritable configuration describing how to materialize one
/// kind of build-execution worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentTemplate {
    /// Unique name within the profile.
    pub name: String,
    /// Whitespace-separated capability labels. Empty means the template
    /// only serves unlabeled demand (in `Normal` mode).
    #[serde(default)]
    pub labels: String,
    /// Name of a sibling template to inherit from. Single hop only: a
    /// parent's own `inherit_from` is never followed.
    #[serde(default)]
    pub inherit_from: Option<String>,

    // Override-policy fields: the child wins when explicitly set,
    // otherwise the parent's value applies.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Concurrent build executors per worker.
    #[serde(default)]
    pub executors: Option<u32>,
    /// Cap on concurrent workers from this template.
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub mode: Option<AgentMode>,
    #[serde(default)]
    pub cpu_limit: Option<Millicores>,
    #[serde(default)]
    pub cpu_reservation: Option<Millicores>,
    #[serde(default)]
    pub memory_limit: Option<MemoryBytes>,
    #[serde(default)]
    pub memory_reservation: Option<MemoryBytes>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub stop_signal: Option<String>,
    #[serde(default)]
    pub stop_grace_secs: Option<u64>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    pub apparmor_profile: Option<String>,
    #[serde(default)]
    pub seccomp_profile: Option<String>,
    /// How long a fresh worker may take to establish its control
    /// channel before it is written off.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Per-template idle retention override.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Provisioning attempts after the first failure.
    #[serde(default)]
    pub retry_count: Option<u32>,
    /// Base delay for the capped exponential retry backoff.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    // Append-policy fields: resolution concatenates the parent's list
    // followed by the child's, duplicates preserved.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// `KEY=VALUE` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<FileRef>,
    #[serde(default)]
    pub configs: Vec<FileRef>,
    /// Build cache directories provisioned as anonymous volumes.
    #[serde(default)]
    pub cache_dirs: Vec<String>,
    /// Placement constraint expressions, e.g. `node.labels.ci == true`.
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    /// `key=value` sysctl entries.
    #[serde(default)]
    pub sysctls: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub dns_options: Vec<String>,
    #[serde(default)]
    pub dns_search: Vec<String>,
    /// Scalar node resources, e.g. accelerator counts.
    #[serde(default)]
    pub generic_resources: Vec<GenericResource>,
    #[serde(default)]
    pub ports: Vec<PortBinding>,

    /// A child can add privilege but never remove the parent's.
    #[serde(default)]
    pub privileged: bool,
}

impl AgentTemplate {
    /// The whitespace-tokenized label set, in declaration order.
    pub fn label_tokens(&self) -> Vec<&str> {
        self.labels.split_whitespace().collect()
    }

    /// Effective template mode (`Normal` unless set).
    pub fn effective_mode(&self) -> AgentMode {
        self.mode.unwrap_or_default()
    }
}

/// Container health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckConfig {
    /// Probe command, exec form.
    pub command: Vec<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period_secs: Option<u64>,
}

/// Filesystem mount for a worker container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mount {
    #[serde(default)]
    pub kind: MountKind,
    /// Host path or volume name. `Ephemeral` mounts have none.
    #[serde(default)]
    pub source: Option<String>,
    /// Path inside the container.
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Mount backing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    Bind,
    #[default]
    Volume,
    /// In-memory scratch space, discarded with the worker.
    Ephemeral,
}

/// Reference to an orchestrator-stored secret or config, projected as
/// a file inside the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRef {
    /// Name of the external object. Never a secret value itself.
    pub name: String,
    /// File path inside the container.
    pub target: String,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    /// File mode, e.g. `0o444`.
    #[serde(default)]
    pub mode: Option<u32>,
}

/// Network to attach plus the aliases the worker answers to on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkAttachment {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A named scalar node resource demand, e.g. `gpu = 2`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericResource {
    pub kind: String,
    pub units: u64,
}

/// One published port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortBinding {
    /// Container-side port.
    pub target: u16,
    /// Cluster-side port; `None` lets the orchestrator pick.
    #[serde(default)]
    pub published: Option<u16>,
    #[serde(default)]
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_tokens_split_on_whitespace() {
        let template = AgentTemplate {
            name: "maven".to_string(),
            labels: "maven  jdk17\tlinux".to_string(),
            ..AgentTemplate::default()
        };
        assert_eq!(template.label_tokens(), vec!["maven", "jdk17", "linux"]);
    }

    #[test]
    fn label_tokens_empty_for_blank_labels() {
        let template = AgentTemplate::default();
        assert!(template.label_tokens().is_empty());
    }

    #[test]
    fn mode_defaults_to_normal() {
        let template = AgentTemplate::default();
        assert_eq!(template.effective_mode(), AgentMode::Normal);
    }

    #[test]
    fn rate_limit_defaults() {
        let limit = RateLimitConfig::default();
        assert_eq!(limit.max_per_minute, 10);
        assert_eq!(limit.min_interval_ms, 500);
    }

    #[test]
    fn template_lookup_by_name() {
        let profile = FleetProfile {
            name: "prod".to_string(),
            endpoint: "tcp://orchestrator:2377".to_string(),
            credentials: None,
            max_workers: 10,
            rate_limit: RateLimitConfig::default(),
            idle_timeout_secs: None,
            templates: vec![
                AgentTemplate {
                    name: "base".to_string(),
                    ..AgentTemplate::default()
                },
                AgentTemplate {
                    name: "maven".to_string(),
                    ..AgentTemplate::default()
                },
            ],
        };
        assert!(profile.template("maven").is_some());
        assert!(profile.template("gradle").is_none());
    }

    #[test]
    fn minimal_template_toml() {
        let template: AgentTemplate = toml::from_str(
            r#"
name = "maven"
image = "ci/maven-agent:3"
labels = "maven jdk17"
max_instances = 2
memory_limit = "512m"
cpu_limit = "2.0"
"#,
        )
        .unwrap();
        assert_eq!(template.name, "maven");
        assert_eq!(template.image.as_deref(), Some("ci/maven-agent:3"));
        assert_eq!(template.max_instances, Some(2));
        assert_eq!(template.memory_limit, Some(MemoryBytes::from_mib(512)));
        assert_eq!(template.cpu_limit, Some(Millicores::from_cores(2)));
        assert!(template.mounts.is_empty());
        assert!(!template.privileged);
    }

    #[test]
    fn mount_kinds_deserialize() {
        let mount: Mount = toml::from_str(
            r#"
kind = "bind"
source = "/var/run/docker.sock"
target = "/var/run/docker.sock"
read_only = true
"#,
        )
        .unwrap();
        assert_eq!(mount.kind, MountKind::Bind);
        assert!(mount.read_only);

        let mount: Mount = toml::from_str("kind = \"ephemeral\"\ntarget = \"/tmp/scratch\"").unwrap();
        assert_eq!(mount.kind, MountKind::Ephemeral);
        assert!(mount.source.is_none());
    }

    #[test]
    fn file_ref_accepts_octal_mode() {
        let secret: FileRef = toml::from_str(
            r#"
name = "registry-token"
target = "/run/secrets/registry-token"
uid = 1000
mode = 0o440
"#,
        )
        .unwrap();
        assert_eq!(secret.mode, Some(0o440));
        assert_eq!(secret.uid, Some(1000));
        assert_eq!(secret.gid, None);
    }
}
