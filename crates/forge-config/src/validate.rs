//! Structural validation of a parsed fleet configuration.
//!
//! Validation runs at load time so that broken profiles are rejected
//! before any capacity decision can act on them. Template inheritance
//! is checked here as a reference graph (parents must exist, no
//! self-inheritance); the actual merge lives in the template resolver.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{AgentTemplate, FleetConfig, FleetProfile, MountKind};

/// Validate an entire configuration.
pub fn validate(config: &FleetConfig) -> ConfigResult<()> {
    if config.controller.callback_url.trim().is_empty() {
        return Err(invalid("controller.callback_url must not be empty"));
    }

    let mut names = HashSet::new();
    for profile in &config.profiles {
        if profile.name.trim().is_empty() {
            return Err(invalid("profile name must not be empty"));
        }
        if !names.insert(profile.name.as_str()) {
            return Err(invalid(format!("duplicate profile name '{}'", profile.name)));
        }
        validate_profile(profile)?;
    }
    Ok(())
}

fn validate_profile(profile: &FleetProfile) -> ConfigResult<()> {
    if profile.endpoint.trim().is_empty() {
        return Err(invalid(format!(
            "profile '{}' has an empty endpoint",
            profile.name
        )));
    }
    if profile.max_workers == 0 {
        return Err(invalid(format!(
            "profile '{}': max_workers must be at least 1",
            profile.name
        )));
    }
    if profile.rate_limit.max_per_minute == 0 {
        return Err(invalid(format!(
            "profile '{}': rate_limit.max_per_minute must be at least 1",
            profile.name
        )));
    }

    let mut names = HashSet::new();
    for template in &profile.templates {
        if template.name.trim().is_empty() {
            return Err(invalid(format!(
                "profile '{}' has a template with an empty name",
                profile.name
            )));
        }
        if !names.insert(template.name.as_str()) {
            return Err(invalid(format!(
                "profile '{}': duplicate template name '{}'",
                profile.name, template.name
            )));
        }
    }

    for template in &profile.templates {
        validate_template(profile, template)?;
    }
    Ok(())
}

fn validate_template(profile: &FleetProfile, template: &AgentTemplate) -> ConfigResult<()> {
    let ctx = |msg: String| invalid(format!("template '{}/{}': {msg}", profile.name, template.name));

    if let Some(parent) = &template.inherit_from {
        if parent == &template.name {
            return Err(ctx("template inherits from itself".to_string()));
        }
        if profile.template(parent).is_none() {
            return Err(ctx(format!("unknown parent template '{parent}'")));
        }
    }

    // Image may come from the template itself or its direct parent.
    let inherited_image = template
        .inherit_from
        .as_deref()
        .and_then(|p| profile.template(p))
        .and_then(|p| p.image.as_deref());
    if template.image.is_none() && inherited_image.is_none() {
        return Err(ctx("no image set and none inherited".to_string()));
    }

    if let (Some(res), Some(limit)) = (template.memory_reservation, template.memory_limit)
        && res > limit
    {
        return Err(ctx(format!(
            "memory_reservation {res} exceeds memory_limit {limit}"
        )));
    }
    if let (Some(res), Some(limit)) = (template.cpu_reservation, template.cpu_limit)
        && res > limit
    {
        return Err(ctx(format!(
            "cpu_reservation {res} exceeds cpu_limit {limit}"
        )));
    }

    for mount in &template.mounts {
        if mount.target.trim().is_empty() {
            return Err(ctx("mount with an empty target".to_string()));
        }
        match mount.kind {
            MountKind::Bind if mount.source.is_none() => {
                return Err(ctx(format!(
                    "bind mount '{}' requires a source path",
                    mount.target
                )));
            }
            MountKind::Ephemeral if mount.source.is_some() => {
                return Err(ctx(format!(
                    "ephemeral mount '{}' must not have a source",
                    mount.target
                )));
            }
            _ => {}
        }
    }

    for entry in &template.env {
        if !entry.contains('=') {
            return Err(ctx(format!("env entry '{entry}' is not KEY=VALUE")));
        }
    }

    for file in template.secrets.iter().chain(template.configs.iter()) {
        if file.name.trim().is_empty() || file.target.trim().is_empty() {
            return Err(ctx("secret/config entries need a name and a target".to_string()));
        }
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
