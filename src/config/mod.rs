//! Configuration management
//!
//! Loads config.toml and builds the runtime pieces the classifier
//! needs from it: the device table and the prefix-backed address
//! ownership test.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use std::net::Ipv4Addr;
use std::path::Path;

use crate::dataplane::frame::{DeviceId, DeviceInfo, DeviceKind, DeviceTable};
use crate::dataplane::routing::AddressOwnership;
use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Builds the device table from the `[[devices]]` entries. Device ids
/// follow declaration order.
pub fn build_device_table(config: &Config) -> Result<DeviceTable> {
    let mut table = DeviceTable::new();
    for (index, device) in config.devices.iter().enumerate() {
        let hw_addr: MacAddr = device.mac.parse().map_err(|_| {
            Error::Config(format!(
                "device '{}' has an invalid mac '{}'",
                device.name, device.mac
            ))
        })?;
        let bridge = match &device.bridge {
            Some(name) => {
                let position = config
                    .devices
                    .iter()
                    .position(|d| &d.name == name)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "device '{}' references undefined bridge '{}'",
                            device.name, name
                        ))
                    })?;
                Some(DeviceId(position as u32))
            }
            None => None,
        };
        let kind = match device.role {
            DeviceRole::Bridge => DeviceKind::Bridge,
            DeviceRole::Port => DeviceKind::Port,
        };
        table.insert(
            DeviceId(index as u32),
            DeviceInfo {
                name: device.name.clone(),
                hw_addr,
                kind,
                bridge,
            },
        );
    }
    Ok(table)
}

pub(crate) fn parse_prefix(prefix: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, len) = prefix
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("prefix '{}' missing /length", prefix)))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("prefix '{}' has an invalid address", prefix)))?;
    let len: u8 = len
        .parse()
        .map_err(|_| Error::Config(format!("prefix '{}' has an invalid length", prefix)))?;
    if len > 32 {
        return Err(Error::Config(format!(
            "prefix '{}' length exceeds 32",
            prefix
        )));
    }
    Ok((addr, len))
}

/// Prefix-list-backed locality test for the post-routing source fix-up.
#[derive(Debug, Clone)]
pub struct PrefixOwnership {
    prefixes: Vec<(Ipv4Addr, u8)>,
}

impl PrefixOwnership {
    pub fn from_config(config: &OwnershipConfig) -> Result<Self> {
        let prefixes = config
            .local_prefixes
            .iter()
            .map(|p| parse_prefix(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { prefixes })
    }
}

impl AddressOwnership for PrefixOwnership {
    fn is_locally_owned(&self, addr: Ipv4Addr) -> bool {
        self.prefixes.iter().any(|&(net, len)| {
            if len == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - len as u32);
            (u32::from(addr) & mask) == (u32::from(net) & mask)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [logging]
        level = "debug"
        format = "json"

        [engine]
        warn_interval_secs = 10

        [[devices]]
        name = "br0"
        mac = "02:00:00:00:00:10"
        role = "bridge"

        [[devices]]
        name = "eth1"
        mac = "02:00:00:00:00:01"
        role = "port"
        bridge = "br0"

        [ownership]
        local_prefixes = ["192.168.7.0/24"]
    "#;

    #[test]
    fn test_parse_full_document() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.engine.warn_interval_secs, 10);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].role, DeviceRole::Bridge);
        assert_eq!(config.devices[1].bridge.as_deref(), Some("br0"));
        assert_eq!(config.ownership.local_prefixes, ["192.168.7.0/24"]);
    }

    #[test]
    fn test_empty_document_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.engine.warn_interval_secs, 5);
        assert!(config.devices.is_empty());
        assert!(config.ownership.local_prefixes.is_empty());
    }

    #[test]
    fn test_build_device_table() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let table = build_device_table(&config).unwrap();

        assert_eq!(table.len(), 2);
        let br0 = table.lookup_name("br0").unwrap();
        let eth1 = table.lookup_name("eth1").unwrap();
        assert_eq!(br0, DeviceId(0));
        assert_eq!(eth1, DeviceId(1));
        assert!(table.is_bridge(br0));
        assert_eq!(table.bridge_parent(eth1), Some(br0));
        assert_eq!(
            table.hw_addr(eth1),
            Some("02:00:00:00:00:01".parse().unwrap())
        );
    }

    #[test]
    fn test_build_rejects_unknown_bridge() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.devices[1].bridge = Some("br9".into());
        assert!(matches!(
            build_device_table(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_prefix_ownership() {
        let ownership = PrefixOwnership::from_config(&OwnershipConfig {
            local_prefixes: vec!["192.168.7.0/24".into(), "10.1.2.3/32".into()],
        })
        .unwrap();

        assert!(ownership.is_locally_owned("192.168.7.200".parse().unwrap()));
        assert!(!ownership.is_locally_owned("192.168.8.1".parse().unwrap()));
        assert!(ownership.is_locally_owned("10.1.2.3".parse().unwrap()));
        assert!(!ownership.is_locally_owned("10.1.2.4".parse().unwrap()));
    }

    #[test]
    fn test_parse_prefix_errors() {
        assert!(parse_prefix("192.168.7.0").is_err());
        assert!(parse_prefix("bogus/24").is_err());
        assert!(parse_prefix("10.0.0.0/33").is_err());
        assert!(parse_prefix("10.0.0.0/8").is_ok());
    }
}
