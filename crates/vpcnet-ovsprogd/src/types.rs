//! Type definitions for ovsprogd

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use vpcnet_cfgmgr_common::{CfgMgrError, CfgMgrResult};

/// Wire-visible overlay key identifying a VPC between hosts.
pub type TunnelId = u32;

/// Internal VLAN tag scoping one VPC inside the local bridges.
///
/// Never leaves the host. Valid values are 1..=4094.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsolationTag(u16);

impl IsolationTag {
    /// Lowest tag handed out.
    pub const MIN: u16 = 1;
    /// Highest tag handed out.
    pub const MAX: u16 = 4094;

    /// Creates a tag, rejecting values outside 1..=4094.
    pub fn new(value: u16) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Returns the VLAN id.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for IsolationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunnel encapsulation used toward a remote host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncapType {
    /// VXLAN
    #[default]
    Vxlan,
    /// GRE
    Gre,
    /// Geneve
    Geneve,
}

impl EncapType {
    /// Interface type understood by the switch.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncapType::Vxlan => "vxlan",
            EncapType::Gre => "gre",
            EncapType::Geneve => "geneve",
        }
    }
}

impl fmt::Display for EncapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vxlan" => Ok(EncapType::Vxlan),
            "gre" => Ok(EncapType::Gre),
            "geneve" => Ok(EncapType::Geneve),
            _ => Err(format!("Unknown encapsulation type: {}", s)),
        }
    }
}

/// Derives the tunnel bridge port name for a remote host.
///
/// Names are `<encap>-<8 hex digits>` and always fit the 15 character
/// interface limit. IPv4 (and IPv4-mapped IPv6) addresses use their own
/// 32-bit value; other IPv6 addresses use a 32-bit FNV-1a digest of their
/// octets. Anything that is not an IP address is rejected.
pub fn endpoint_port_name(encap: EncapType, remote_address: &str) -> CfgMgrResult<String> {
    let ip: IpAddr = remote_address.parse().map_err(|_| {
        CfgMgrError::precondition(
            "remote_address",
            format!("'{}' is not an IP address", remote_address),
        )
    })?;

    let suffix = match ip {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => u32::from(v4),
            None => fnv1a_32(&v6.octets()),
        },
    };
    Ok(format!("{}-{:08x}", encap.as_str(), suffix))
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(PRIME)
    })
}
