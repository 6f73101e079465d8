//! Configuration validation

use super::{parse_prefix, Config, DeviceRole};
use crate::protocol::MacAddr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_devices(config, &mut result);
    validate_ownership(config, &mut result);
    validate_engine(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_devices(config: &Config, result: &mut ValidationResult) {
    for (index, device) in config.devices.iter().enumerate() {
        if config.devices[..index].iter().any(|d| d.name == device.name) {
            result.error(format!("devices.{}: duplicate device name", device.name));
        }

        if device.mac.parse::<MacAddr>().is_err() {
            result.error(format!(
                "devices.{}: invalid mac address '{}'",
                device.name, device.mac
            ));
        }

        match device.role {
            DeviceRole::Bridge => {
                if device.bridge.is_some() {
                    result.error(format!(
                        "devices.{}: a bridge device cannot belong to another bridge",
                        device.name
                    ));
                }
            }
            DeviceRole::Port => {
                if let Some(bridge) = &device.bridge {
                    match config.devices.iter().find(|d| &d.name == bridge) {
                        Some(parent) if parent.role == DeviceRole::Bridge => {}
                        Some(_) => result.error(format!(
                            "devices.{}: bridge '{}' is not a bridge device",
                            device.name, bridge
                        )),
                        None => result.error(format!(
                            "devices.{}: bridge '{}' not defined",
                            device.name, bridge
                        )),
                    }
                }
            }
        }
    }

    if !config
        .devices
        .iter()
        .any(|d| d.role == DeviceRole::Bridge)
    {
        result.warn("devices: no bridge device defined, all frames will pass through");
    }
}

fn validate_ownership(config: &Config, result: &mut ValidationResult) {
    for prefix in &config.ownership.local_prefixes {
        if parse_prefix(prefix).is_err() {
            result.error(format!(
                "ownership.local_prefixes: invalid prefix '{}'",
                prefix
            ));
        }
    }

    if config.ownership.local_prefixes.is_empty() {
        result.warn("ownership: no local prefixes, source fix-up after SNAT is disabled");
    }
}

fn validate_engine(config: &Config, result: &mut ValidationResult) {
    if config.engine.warn_interval_secs == 0 {
        result.warn("engine.warn_interval_secs is 0, no-route warnings are not rate limited");
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let level = config.logging.level.as_str();
    if !matches!(level, "error" | "warn" | "info" | "debug" | "trace") {
        result.warn(format!("logging.level: unknown level '{}', using info", level));
    }

    let format = config.logging.format.as_str();
    if !matches!(format, "pretty" | "compact" | "json") {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            format
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, EngineConfig};

    fn device(name: &str, mac: &str, role: DeviceRole, bridge: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            name: name.into(),
            mac: mac.into(),
            role,
            bridge: bridge.map(Into::into),
        }
    }

    fn valid_config() -> Config {
        Config {
            devices: vec![
                device("br0", "02:00:00:00:00:10", DeviceRole::Bridge, None),
                device("eth1", "02:00:00:00:00:01", DeviceRole::Port, Some("br0")),
            ],
            ownership: crate::config::OwnershipConfig {
                local_prefixes: vec!["192.168.7.0/24".into()],
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let result = validate(&valid_config());
        assert!(!result.has_errors(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_duplicate_device_name() {
        let mut config = valid_config();
        config
            .devices
            .push(device("eth1", "02:00:00:00:00:02", DeviceRole::Port, None));
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let mut config = valid_config();
        config.devices[1].mac = "not-a-mac".into();
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("invalid mac")));
    }

    #[test]
    fn test_unknown_bridge_rejected() {
        let mut config = valid_config();
        config.devices[1].bridge = Some("br9".into());
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("not defined")));
    }

    #[test]
    fn test_port_as_bridge_parent_rejected() {
        let mut config = valid_config();
        config
            .devices
            .push(device("eth2", "02:00:00:00:00:02", DeviceRole::Port, Some("eth1")));
        let result = validate(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("not a bridge device")));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut config = valid_config();
        config.ownership.local_prefixes.push("10.0.0.0/33".into());
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("invalid prefix")));
    }

    #[test]
    fn test_warnings_for_lenient_settings() {
        let config = Config {
            devices: vec![device("eth1", "02:00:00:00:00:01", DeviceRole::Port, None)],
            engine: EngineConfig {
                warn_interval_secs: 0,
            },
            ..Config::default()
        };
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("no bridge device")));
        assert!(result.warnings.iter().any(|w| w.contains("rate limited")));
        assert!(result.warnings.iter().any(|w| w.contains("source fix-up")));
    }
}
