//! Loading and parsing of fleet configuration files.

use std::path::Path;

use tracing::info;

use crate::error::ConfigResult;
use crate::types::FleetConfig;
use crate::validate;

impl FleetConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        info!(
            path = %path.display(),
            profiles = config.profiles.len(),
            "fleet config loaded"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(raw)?;
        validate::validate(&config)?;
        Ok(config)
    }
}
