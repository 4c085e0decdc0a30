//! Verification helpers for testing the tunnel bridge pipeline
//!
//! Provides assertion helpers over [`SimulatedSwitch`] flow tables and a
//! small packet walker that follows `resubmit` actions through them.

use crate::switch::{InstalledFlow, SimulatedSwitch};
use thiserror::Error;

/// Upper bound on resubmits followed by the packet walker.
const MAX_RESUBMITS: usize = 16;

/// Verification error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Bridge '{bridge}' not found")]
    BridgeNotFound { bridge: String },

    #[error("No rule in table {table} matching {field}={value}")]
    RuleNotFound {
        table: u8,
        field: String,
        value: String,
    },

    #[error("Expected {expected} rules in table {table}, found {actual}")]
    RuleCountMismatch {
        table: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Rule in table {table} has malformed action '{action}'")]
    MalformedAction { table: u8, action: String },

    #[error("Baseline rule missing: {detail}")]
    BaselineMissing { detail: String },

    #[error("Resubmit loop or depth exceeded starting at table {table}")]
    ResubmitDepth { table: u8 },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Where a walked packet ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Egress {
    pub port: String,
    /// VLAN tag on the packet at output, if any
    pub vlan: Option<u16>,
    /// Tunnel key set at output, if any
    pub tunnel_id: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct Packet {
    in_port: String,
    vlan: Option<u16>,
    tunnel_id: Option<u32>,
}

/// Flow table verification helper for one bridge
pub struct FlowVerifier<'a> {
    switch: &'a SimulatedSwitch,
    bridge: String,
}

impl<'a> FlowVerifier<'a> {
    /// Create a verifier for `bridge`
    pub fn new(switch: &'a SimulatedSwitch, bridge: impl Into<String>) -> Self {
        Self {
            switch,
            bridge: bridge.into(),
        }
    }

    fn flows(&self) -> VerifyResult<Vec<InstalledFlow>> {
        if !self.switch.has_bridge(&self.bridge) {
            return Err(VerificationError::BridgeNotFound {
                bridge: self.bridge.clone(),
            });
        }
        Ok(self.switch.flows(&self.bridge))
    }

    fn find(&self, table: u8, field: &str, value: &str) -> VerifyResult<InstalledFlow> {
        self.flows()?
            .into_iter()
            .find(|f| f.table == table && f.match_field(field) == Some(value))
            .ok_or_else(|| VerificationError::RuleNotFound {
                table,
                field: field.to_string(),
                value: value.to_string(),
            })
    }

    /// Verify the number of rules in a table
    pub fn assert_rule_count(&self, table: u8, expected: usize) -> VerifyResult<()> {
        let actual = self.flows()?.iter().filter(|f| f.table == table).count();
        if actual != expected {
            return Err(VerificationError::RuleCountMismatch {
                table,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the rules installed at bridge creation
    pub fn assert_baseline(&self, tunnel_patch: &str) -> VerifyResult<()> {
        let from_patch = self.find(0, "in_port", tunnel_patch)?;
        if from_patch.actions != ["resubmit(,2)"] {
            return Err(VerificationError::BaselineMissing {
                detail: format!("in_port={} does not resubmit to table 2", tunnel_patch),
            });
        }

        let catch_all = self
            .flows()?
            .into_iter()
            .any(|f| f.table == 2 && f.priority == 0 && f.matches.is_empty()
                && f.actions == ["resubmit(,22)"]);
        if !catch_all {
            return Err(VerificationError::BaselineMissing {
                detail: "table 2 catch-all to table 22".to_string(),
            });
        }
        Ok(())
    }

    /// Verify that traffic from `endpoint` is steered to decapsulation
    pub fn assert_endpoint_steered(&self, endpoint: &str) -> VerifyResult<()> {
        let rule = self.find(0, "in_port", endpoint)?;
        if rule.actions != ["resubmit(,4)"] {
            return Err(VerificationError::RuleNotFound {
                table: 0,
                field: "in_port".to_string(),
                value: endpoint.to_string(),
            });
        }
        Ok(())
    }

    /// The isolation tag a tunnel key decapsulates to
    pub fn decap_tag(&self, tunnel_id: u32) -> VerifyResult<u16> {
        let rule = self.find(4, "tun_id", &tunnel_id.to_string())?;
        rule.actions
            .iter()
            .find_map(|a| a.strip_prefix("mod_vlan_vid:"))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| VerificationError::MalformedAction {
                table: 4,
                action: rule.actions.join(","),
            })
    }

    /// Endpoints a tag floods to, in output order
    pub fn flood_outputs(&self, tag: u16) -> VerifyResult<Vec<String>> {
        let rule = self.find(22, "dl_vlan", &tag.to_string())?;
        Ok(rule.outputs().into_iter().map(str::to_string).collect())
    }

    /// The tunnel key a tag's flood rule loads
    pub fn flood_tunnel_id(&self, tag: u16) -> VerifyResult<u32> {
        let rule = self.find(22, "dl_vlan", &tag.to_string())?;
        rule.actions
            .iter()
            .find_map(|a| parse_tunnel_load(a))
            .ok_or_else(|| VerificationError::MalformedAction {
                table: 22,
                action: rule.actions.join(","),
            })
    }

    /// Walks a packet entering on `in_port` through the pipeline.
    ///
    /// Returns every output it reaches. A packet matching no rule in a table
    /// is dropped and yields no egress.
    pub fn trace(
        &self,
        in_port: &str,
        vlan: Option<u16>,
        tunnel_id: Option<u32>,
    ) -> VerifyResult<Vec<Egress>> {
        let flows = self.flows()?;
        let mut packet = Packet {
            in_port: in_port.to_string(),
            vlan,
            tunnel_id,
        };
        let mut egress = Vec::new();
        walk(&flows, 0, &mut packet, &mut egress, 0)?;
        Ok(egress)
    }
}

fn walk(
    flows: &[InstalledFlow],
    table: u8,
    packet: &mut Packet,
    egress: &mut Vec<Egress>,
    depth: usize,
) -> VerifyResult<()> {
    if depth > MAX_RESUBMITS {
        return Err(VerificationError::ResubmitDepth { table });
    }

    let Some(rule) = flows
        .iter()
        .filter(|f| f.table == table && matches_packet(f, packet))
        .max_by_key(|f| f.priority)
    else {
        return Ok(());
    };

    for action in &rule.actions {
        if let Some(port) = action.strip_prefix("output:") {
            egress.push(Egress {
                port: port.to_string(),
                vlan: packet.vlan,
                tunnel_id: packet.tunnel_id,
            });
        } else if let Some(vid) = action.strip_prefix("mod_vlan_vid:") {
            packet.vlan = vid.parse().ok();
        } else if action == "strip_vlan" {
            packet.vlan = None;
        } else if let Some(id) = parse_tunnel_load(action) {
            packet.tunnel_id = Some(id);
        } else if let Some(next) = parse_resubmit(action) {
            walk(flows, next, packet, egress, depth + 1)?;
        } else {
            return Err(VerificationError::MalformedAction {
                table,
                action: action.clone(),
            });
        }
    }
    Ok(())
}

fn matches_packet(flow: &InstalledFlow, packet: &Packet) -> bool {
    flow.matches.iter().all(|(field, value)| match field.as_str() {
        "in_port" => packet.in_port == *value,
        "dl_vlan" => packet.vlan.map(|v| v.to_string()).as_deref() == Some(value.as_str()),
        "tun_id" => packet.tunnel_id.map(|t| t.to_string()).as_deref() == Some(value.as_str()),
        _ => false,
    })
}

fn parse_resubmit(action: &str) -> Option<u8> {
    action
        .strip_prefix("resubmit(,")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

fn parse_tunnel_load(action: &str) -> Option<u32> {
    action
        .strip_prefix("load:")?
        .strip_suffix("->NXM_NX_TUN_ID[]")?
        .parse()
        .ok()
}
