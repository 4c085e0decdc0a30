//! Tunnel bridge flow pipeline
//!
//! | Table | Match | Action |
//! |-------|-------|--------|
//! | 0 | `in_port` = tunnel-side patch port | `resubmit(,2)` |
//! | 0 | `in_port` = remote endpoint port | `resubmit(,4)` |
//! | 2 | catch-all, priority 0 | `resubmit(,22)` |
//! | 4 | `tun_id` = T | `mod_vlan_vid:<tag>`, output to patch port |
//! | 22 | `dl_vlan` = tag | `strip_vlan`, load T into tunnel key, output to every endpoint |
//!
//! Every installer renders through [`FlowRule`] so that rules written by
//! independent calls compare equal on match and priority.

use std::fmt;

use crate::types::{IsolationTag, TunnelId};

/// Classification of traffic entering the tunnel bridge.
pub const TABLE_CLASSIFY: u8 = 0;

/// Traffic arriving from the integration bridge.
pub const TABLE_FROM_INTEGRATION: u8 = 2;

/// Decapsulation: tunnel key to isolation tag.
pub const TABLE_DECAP: u8 = 4;

/// Encapsulation fan-out to remote endpoints.
pub const TABLE_FLOOD: u8 = 22;

/// Priority of every specific rule.
pub const PRIORITY_DEFAULT: u16 = 1;

/// Priority of catch-all rules.
pub const PRIORITY_LOWEST: u16 = 0;

/// A single OpenFlow rule in `ovs-ofctl` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub table: u8,
    pub priority: u16,
    /// `field=value` match terms, in rendering order
    pub matches: Vec<(String, String)>,
    pub actions: Vec<String>,
}

impl FlowRule {
    fn new(table: u8, priority: u16) -> Self {
        Self {
            table,
            priority,
            matches: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn with_match(mut self, field: &str, value: impl ToString) -> Self {
        self.matches.push((field.to_string(), value.to_string()));
        self
    }

    fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Table 0: traffic from the integration bridge goes to table 2.
    pub fn from_integration(tunnel_patch: &str) -> Self {
        Self::new(TABLE_CLASSIFY, PRIORITY_DEFAULT)
            .with_match("in_port", tunnel_patch)
            .with_action(resubmit(TABLE_FROM_INTEGRATION))
    }

    /// Table 2: anything not claimed earlier is flooded.
    pub fn flood_default() -> Self {
        Self::new(TABLE_FROM_INTEGRATION, PRIORITY_LOWEST).with_action(resubmit(TABLE_FLOOD))
    }

    /// Table 0: traffic from a remote endpoint goes to decapsulation.
    pub fn from_endpoint(endpoint: &str) -> Self {
        Self::new(TABLE_CLASSIFY, PRIORITY_DEFAULT)
            .with_match("in_port", endpoint)
            .with_action(resubmit(TABLE_DECAP))
    }

    /// Table 4: bind a tunnel key to a VPC's isolation tag.
    pub fn decap(tunnel_id: TunnelId, tag: IsolationTag, tunnel_patch: &str) -> Self {
        Self::new(TABLE_DECAP, PRIORITY_DEFAULT)
            .with_match("tun_id", tunnel_id)
            .with_action(format!("mod_vlan_vid:{}", tag))
            .with_action(format!("output:{}", tunnel_patch))
    }

    /// Table 4 match only, for removing a stale binding.
    pub fn decap_match(tunnel_id: TunnelId) -> Self {
        Self::new(TABLE_DECAP, PRIORITY_DEFAULT).with_match("tun_id", tunnel_id)
    }

    /// Table 22: replicate a VPC's traffic to every remote endpoint.
    pub fn flood(tag: IsolationTag, tunnel_id: TunnelId, endpoints: &[String]) -> Self {
        let rule = Self::new(TABLE_FLOOD, PRIORITY_DEFAULT)
            .with_match("dl_vlan", tag)
            .with_action("strip_vlan")
            .with_action(format!("load:{}->NXM_NX_TUN_ID[]", tunnel_id));

        endpoints
            .iter()
            .fold(rule, |rule, ep| rule.with_action(format!("output:{}", ep)))
    }

    /// Renders `table=..,priority=..,<matches>` without actions.
    pub fn match_spec(&self) -> String {
        let mut spec = format!("table={},priority={}", self.table, self.priority);
        for (field, value) in &self.matches {
            spec.push_str(&format!(",{}={}", field, value));
        }
        spec
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.match_spec())?;
        if !self.actions.is_empty() {
            write!(f, ",actions={}", self.actions.join(","))?;
        }
        Ok(())
    }
}

fn resubmit(table: u8) -> String {
    format!("resubmit(,{})", table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(v: u16) -> IsolationTag {
        IsolationTag::new(v).unwrap()
    }

    #[test]
    fn test_baseline_rules() {
        assert_eq!(
            FlowRule::from_integration("patch-int").to_string(),
            "table=0,priority=1,in_port=patch-int,actions=resubmit(,2)"
        );
        assert_eq!(
            FlowRule::flood_default().to_string(),
            "table=2,priority=0,actions=resubmit(,22)"
        );
    }

    #[test]
    fn test_decap_rule() {
        assert_eq!(
            FlowRule::decap(42, tag(1), "patch-int").to_string(),
            "table=4,priority=1,tun_id=42,actions=mod_vlan_vid:1,output:patch-int"
        );
    }

    #[test]
    fn test_decap_match_shares_match_with_rule() {
        assert_eq!(
            FlowRule::decap_match(42).match_spec(),
            FlowRule::decap(42, tag(9), "patch-int").match_spec()
        );
    }

    #[test]
    fn test_flood_rule_outputs_in_order() {
        let endpoints = vec!["vxlan-0a000002".to_string(), "vxlan-0a000001".to_string()];
        assert_eq!(
            FlowRule::flood(tag(3), 42, &endpoints).to_string(),
            "table=22,priority=1,dl_vlan=3,actions=strip_vlan,load:42->NXM_NX_TUN_ID[],\
             output:vxlan-0a000002,output:vxlan-0a000001"
        );
    }

    #[test]
    fn test_endpoint_steering_rule() {
        assert_eq!(
            FlowRule::from_endpoint("vxlan-c0a8010a").to_string(),
            "table=0,priority=1,in_port=vxlan-c0a8010a,actions=resubmit(,4)"
        );
    }
}
