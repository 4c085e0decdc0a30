//! Configuration file support
//!
//! Loads and validates dataplane configuration from TOML files.
//! Default location: /etc/vpcnet/ovsprogd.toml

use crate::error::{CfgMgrError, CfgMgrResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vpcnet/ovsprogd.toml";

/// Bridge and patch port names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge hosting VM-facing ports
    #[serde(default = "default_integration_bridge")]
    pub integration: String,

    /// Bridge hosting tunnel endpoint ports
    #[serde(default = "default_tunnel_bridge")]
    pub tunnel: String,

    /// Patch port on the integration bridge (peer of `tunnel_patch`)
    #[serde(default = "default_integration_patch")]
    pub integration_patch: String,

    /// Patch port on the tunnel bridge (peer of `integration_patch`)
    #[serde(default = "default_tunnel_patch")]
    pub tunnel_patch: String,
}

/// External tool locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// OVSDB management tool
    #[serde(default = "default_ovs_vsctl")]
    pub ovs_vsctl: String,

    /// OpenFlow management tool
    #[serde(default = "default_ovs_ofctl")]
    pub ovs_ofctl: String,

    /// Host interface tool
    #[serde(default = "default_ip")]
    pub ip: String,
}

/// Complete ovsprogd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvsProgConfig {
    /// Bridge topology names
    #[serde(default)]
    pub bridges: BridgeConfig,

    /// Tool paths
    #[serde(default)]
    pub commands: CommandConfig,

    /// Create, address and bring up local ports on this host
    #[serde(default)]
    pub local_apply: bool,
}

fn default_integration_bridge() -> String {
    "br-int".to_string()
}

fn default_tunnel_bridge() -> String {
    "br-tun".to_string()
}

fn default_integration_patch() -> String {
    "patch-tun".to_string()
}

fn default_tunnel_patch() -> String {
    "patch-int".to_string()
}

fn default_ovs_vsctl() -> String {
    crate::shell::OVS_VSCTL_CMD.to_string()
}

fn default_ovs_ofctl() -> String {
    crate::shell::OVS_OFCTL_CMD.to_string()
}

fn default_ip() -> String {
    crate::shell::IP_CMD.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            integration: default_integration_bridge(),
            tunnel: default_tunnel_bridge(),
            integration_patch: default_integration_patch(),
            tunnel_patch: default_tunnel_patch(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            ovs_vsctl: default_ovs_vsctl(),
            ovs_ofctl: default_ovs_ofctl(),
            ip: default_ip(),
        }
    }
}

impl OvsProgConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> CfgMgrResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    CfgMgrError::invalid_config(
                        path.display().to_string(),
                        format!("Failed to parse config file: {}", e),
                    )
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CfgMgrError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> CfgMgrResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> CfgMgrResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CfgMgrError::invalid_config("config", format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> CfgMgrResult<()> {
        let b = &self.bridges;
        for (field, value) in [
            ("bridges.integration", &b.integration),
            ("bridges.tunnel", &b.tunnel),
            ("bridges.integration_patch", &b.integration_patch),
            ("bridges.tunnel_patch", &b.tunnel_patch),
            ("commands.ovs_vsctl", &self.commands.ovs_vsctl),
            ("commands.ovs_ofctl", &self.commands.ovs_ofctl),
            ("commands.ip", &self.commands.ip),
        ] {
            if value.trim().is_empty() {
                return Err(CfgMgrError::invalid_config(field, "must not be empty"));
            }
        }

        if b.integration == b.tunnel {
            return Err(CfgMgrError::invalid_config(
                "bridges.tunnel",
                "must differ from bridges.integration",
            ));
        }

        if b.integration_patch == b.tunnel_patch {
            return Err(CfgMgrError::invalid_config(
                "bridges.tunnel_patch",
                "must differ from bridges.integration_patch",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = OvsProgConfig::default();
        assert_eq!(config.bridges.integration, "br-int");
        assert_eq!(config.bridges.tunnel, "br-tun");
        assert_eq!(config.bridges.integration_patch, "patch-tun");
        assert_eq!(config.bridges.tunnel_patch, "patch-int");
        assert_eq!(config.commands.ovs_vsctl, "/usr/bin/ovs-vsctl");
        assert!(!config.local_apply);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: OvsProgConfig = toml::from_str(
            r#"
            local_apply = true

            [bridges]
            integration = "br-vm"
            "#,
        )
        .unwrap();

        assert!(config.local_apply);
        assert_eq!(config.bridges.integration, "br-vm");
        assert_eq!(config.bridges.tunnel, "br-tun");
        assert_eq!(config.commands, CommandConfig::default());
    }

    #[test]
    fn test_validate_rejects_same_bridge() {
        let mut config = OvsProgConfig::default();
        config.bridges.tunnel = "br-int".to_string();
        assert!(matches!(
            config.validate(),
            Err(CfgMgrError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut config = OvsProgConfig::default();
        config.bridges.tunnel_patch = " ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bridges.tunnel_patch"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OvsProgConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, OvsProgConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ovsprogd.toml");

        let mut config = OvsProgConfig::default();
        config.local_apply = true;
        config.commands.ip = "/usr/sbin/ip".to_string();
        config.save(&path).unwrap();

        let loaded = OvsProgConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "local_apply = \"yes please\"").unwrap();

        assert!(matches!(
            OvsProgConfig::load_or_default(&path),
            Err(CfgMgrError::InvalidConfig { .. })
        ));
    }
}
