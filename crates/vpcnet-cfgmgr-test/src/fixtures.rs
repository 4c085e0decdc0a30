//! Test fixtures for VPC programming scenarios
//!
//! Provides reusable intent sets in the same TOML shape the daemon reads.

use serde::Serialize;

/// A local port to admit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortFixture {
    pub vpc_id: String,
    pub port_name: String,
    pub virtual_address: String,
    pub tunnel_id: u32,
}

/// A remote host to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborFixture {
    pub vpc_id: String,
    pub encap: String,
    pub remote_address: String,
    pub tunnel_id: u32,
}

/// Builder for a set of port and neighbor intents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Scenario {
    #[serde(rename = "port", skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortFixture>,
    #[serde(rename = "neighbor", skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<NeighborFixture>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a local port
    pub fn port(
        mut self,
        vpc_id: impl Into<String>,
        port_name: impl Into<String>,
        virtual_address: impl Into<String>,
        tunnel_id: u32,
    ) -> Self {
        self.ports.push(PortFixture {
            vpc_id: vpc_id.into(),
            port_name: port_name.into(),
            virtual_address: virtual_address.into(),
            tunnel_id,
        });
        self
    }

    /// Add a VXLAN neighbor
    pub fn neighbor(
        self,
        vpc_id: impl Into<String>,
        remote_address: impl Into<String>,
        tunnel_id: u32,
    ) -> Self {
        self.neighbor_with_encap(vpc_id, "vxlan", remote_address, tunnel_id)
    }

    /// Add a neighbor with an explicit encapsulation name
    pub fn neighbor_with_encap(
        mut self,
        vpc_id: impl Into<String>,
        encap: impl Into<String>,
        remote_address: impl Into<String>,
        tunnel_id: u32,
    ) -> Self {
        self.neighbors.push(NeighborFixture {
            vpc_id: vpc_id.into(),
            encap: encap.into(),
            remote_address: remote_address.into(),
            tunnel_id,
        });
        self
    }

    /// Render as an intent file
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

/// Address of the `index`-th simulated remote host (`10.1.x.y`).
pub fn remote_host(index: u16) -> String {
    format!("10.1.{}.{}", index / 250, index % 250 + 1)
}

/// One VPC with a local port and `neighbors` remote hosts.
pub fn single_vpc_fanout(vpc_id: &str, tunnel_id: u32, neighbors: u16) -> Scenario {
    (0..neighbors).fold(
        Scenario::new().port(vpc_id, format!("{}-vm0", vpc_id), "10.0.0.5/24", tunnel_id),
        |s, i| s.neighbor(vpc_id, remote_host(i), tunnel_id),
    )
}

/// `count` VPCs, each with one local port and one neighbor.
pub fn many_vpcs(count: u32) -> Scenario {
    (0..count).fold(Scenario::new(), |s, i| {
        let vpc = format!("vpc-{}", i);
        s.port(&vpc, format!("port-{}", i), format!("10.{}.0.5/24", i % 250), 1000 + i)
            .neighbor(&vpc, remote_host(i as u16), 1000 + i)
    })
}
