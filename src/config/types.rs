//! Configuration types

use serde::Deserialize;

use crate::telemetry::LogConfig;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub ownership: OwnershipConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum seconds between no-route warnings.
    pub warn_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warn_interval_secs: 5,
        }
    }
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub mac: String,
    pub role: DeviceRole,
    /// Name of the bridge this port belongs to.
    #[serde(default)]
    pub bridge: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Bridge,
    Port,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnershipConfig {
    /// CIDR prefixes whose addresses count as locally owned,
    /// e.g. "192.168.7.0/24".
    #[serde(default)]
    pub local_prefixes: Vec<String>,
}
