//! Workload request mapping.
//!
//! `WorkloadSpec` is the orchestrator-facing request shape. It is
//! built from a resolved template; configuration-level concepts are
//! translated here (ephemeral mounts become tmpfs, cache directories
//! become anonymous volumes, `key=value` sysctl strings become a map,
//! file references pick up concrete ownership defaults).

use std::collections::BTreeMap;

use forge_config::quantity::{MemoryBytes, Millicores};
use forge_config::types::{AgentTemplate, FileRef, MountKind};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Tag key marking a workload as controller-owned.
pub const TAG_OWNER: &str = "forgefleet.owner";
/// Tag key carrying the owning profile name.
pub const TAG_PROFILE: &str = "forgefleet.profile";
/// Tag key carrying the owning template name.
pub const TAG_TEMPLATE: &str = "forgefleet.template";
/// Value stored under [`TAG_OWNER`].
pub const OWNER_VALUE: &str = "forgefleet";

/// Default file mode for projected secrets and configs.
const DEFAULT_FILE_MODE: u32 = 0o444;

/// A complete workload creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    /// `KEY=VALUE` environment entries, in declaration order.
    pub env: Vec<String>,
    /// Owner tags attached to the workload for later listing.
    pub tags: BTreeMap<String, String>,
    pub resources: ResourceSpec,
    pub mounts: Vec<MountSpec>,
    pub secrets: Vec<FileMountSpec>,
    pub configs: Vec<FileMountSpec>,
    pub constraints: Vec<String>,
    pub networks: Vec<NetworkSpec>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub sysctls: BTreeMap<String, String>,
    pub dns: DnsSpec,
    pub health_check: Option<HealthCheckSpec>,
    pub stop_signal: Option<String>,
    pub stop_grace_secs: Option<u64>,
    pub apparmor_profile: Option<String>,
    pub seccomp_profile: Option<String>,
    pub generic_resources: Vec<GenericResourceSpec>,
    pub ports: Vec<PortSpec>,
    pub privileged: bool,
}

/// Limit and reservation pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub limit: ResourceSet,
    pub reservation: ResourceSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub cpu: Option<Millicores>,
    pub memory: Option<MemoryBytes>,
}

/// Wire-level mount type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSpec {
    pub kind: MountType,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
}

/// A secret or config projected into the container filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMountSpec {
    /// External object name; the value never passes through here.
    pub name: String,
    pub target: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsSpec {
    pub servers: Vec<String>,
    pub options: Vec<String>,
    pub search: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Probe command, exec form.
    pub command: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
    pub start_period_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericResourceSpec {
    pub kind: String,
    pub units: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub target: u16,
    pub published: Option<u16>,
    pub protocol: Protocol,
}

impl WorkloadSpec {
    /// Build a workload request from a resolved template.
    ///
    /// The template must carry an image (its own or inherited); sysctl
    /// entries must be `key=value`. Both are checked here so that a
    /// broken spec fails before the orchestrator call.
    pub fn from_template(template: &AgentTemplate, profile_name: &str) -> GatewayResult<Self> {
        let image = template.image.clone().ok_or_else(|| {
            GatewayError::InvalidSpec(format!("template '{}' has no image", template.name))
        })?;

        let mut sysctls = BTreeMap::new();
        for entry in &template.sysctls {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(GatewayError::InvalidSpec(format!(
                    "sysctl entry '{entry}' is not key=value"
                )));
            };
            sysctls.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut mounts: Vec<MountSpec> = template
            .mounts
            .iter()
            .map(|m| MountSpec {
                kind: match m.kind {
                    MountKind::Bind => MountType::Bind,
                    MountKind::Volume => MountType::Volume,
                    MountKind::Ephemeral => MountType::Tmpfs,
                },
                source: m.source.clone(),
                target: m.target.clone(),
                read_only: m.read_only,
            })
            .collect();
        // Cache directories become anonymous volumes: orchestrator-
        // provisioned, discarded with the worker.
        mounts.extend(template.cache_dirs.iter().map(|dir| MountSpec {
            kind: MountType::Volume,
            source: None,
            target: dir.clone(),
            read_only: false,
        }));

        let mut tags = BTreeMap::new();
        tags.insert(TAG_OWNER.to_string(), OWNER_VALUE.to_string());
        tags.insert(TAG_PROFILE.to_string(), profile_name.to_string());
        tags.insert(TAG_TEMPLATE.to_string(), template.name.clone());

        Ok(Self {
            image,
            command: template.command.clone(),
            working_dir: template.working_dir.clone(),
            user: template.user.clone(),
            hostname: template.hostname.clone(),
            env: template.env.clone(),
            tags,
            resources: ResourceSpec {
                limit: ResourceSet {
                    cpu: template.cpu_limit,
                    memory: template.memory_limit,
                },
                reservation: ResourceSet {
                    cpu: template.cpu_reservation,
                    memory: template.memory_reservation,
                },
            },
            mounts,
            secrets: template.secrets.iter().map(file_mount).collect(),
            configs: template.configs.iter().map(file_mount).collect(),
            constraints: template.constraints.clone(),
            networks: template
                .networks
                .iter()
                .map(|n| NetworkSpec {
                    name: n.name.clone(),
                    aliases: n.aliases.clone(),
                })
                .collect(),
            cap_add: template.cap_add.clone(),
            cap_drop: template.cap_drop.clone(),
            sysctls,
            dns: DnsSpec {
                servers: template.dns_servers.clone(),
                options: template.dns_options.clone(),
                search: template.dns_search.clone(),
            },
            health_check: template.health_check.as_ref().map(|hc| HealthCheckSpec {
                command: hc.command.clone(),
                interval_secs: hc.interval_secs.unwrap_or(30),
                timeout_secs: hc.timeout_secs.unwrap_or(30),
                retries: hc.retries.unwrap_or(3),
                start_period_secs: hc.start_period_secs.unwrap_or(0),
            }),
            stop_signal: template.stop_signal.clone(),
            stop_grace_secs: template.stop_grace_secs,
            apparmor_profile: template.apparmor_profile.clone(),
            seccomp_profile: template.seccomp_profile.clone(),
            generic_resources: template
                .generic_resources
                .iter()
                .map(|g| GenericResourceSpec {
                    kind: g.kind.clone(),
                    units: g.units,
                })
                .collect(),
            ports: template
                .ports
                .iter()
                .map(|p| PortSpec {
                    target: p.target,
                    published: p.published,
                    protocol: match p.protocol {
                        forge_config::types::PortProtocol::Tcp => Protocol::Tcp,
                        forge_config::types::PortProtocol::Udp => Protocol::Udp,
                    },
                })
                .collect(),
            privileged: template.privileged,
        })
    }

    /// Template name recorded in the owner tags.
    pub fn template_name(&self) -> Option<&str> {
        self.tags.get(TAG_TEMPLATE).map(String::as_str)
    }
}

fn file_mount(file: &FileRef) -> FileMountSpec {
    FileMountSpec {
        name: file.name.clone(),
        target: file.target.clone(),
        uid: file.uid.unwrap_or(0),
        gid: file.gid.unwrap_or(0),
        mode: file.mode.unwrap_or(DEFAULT_FILE_MODE),
    }
}
