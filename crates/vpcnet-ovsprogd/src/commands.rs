//! Command builders for bridge, flow and host operations
//!
//! Builders return command text without the tool path; the
//! [`CommandSink`](vpcnet_cfgmgr_common::CommandSink) supplies it.

use vpcnet_cfgmgr_common::shell::shellquote;

use crate::flows::FlowRule;
use crate::types::{EncapType, IsolationTag};

/// Build bridge existence check command
///
/// Exits 0 if the bridge exists, 2 if it does not.
pub fn build_bridge_exists_cmd(bridge: &str) -> String {
    format!("br-exists {}", shellquote(bridge))
}

/// Build bridge creation command
pub fn build_add_bridge_cmd(bridge: &str) -> String {
    format!("add-br {}", shellquote(bridge))
}

/// Build plain port attach command
pub fn build_add_port_cmd(bridge: &str, port: &str) -> String {
    format!("add-port {} {}", shellquote(bridge), shellquote(port))
}

/// Build command marking an interface as a patch port
pub fn build_set_patch_type_cmd(port: &str) -> String {
    format!("set interface {} type=patch", shellquote(port))
}

/// Build command pointing a patch port at its peer
pub fn build_set_patch_peer_cmd(port: &str, peer: &str) -> String {
    format!(
        "set interface {} options:peer={}",
        shellquote(port),
        shellquote(peer)
    )
}

/// Build VM-facing internal port creation command
///
/// The port is access-tagged with the VPC's isolation tag.
pub fn build_add_local_port_cmd(bridge: &str, port: &str, tag: IsolationTag) -> String {
    format!(
        "add-port {} {} tag={} -- set Interface {} type=internal",
        shellquote(bridge),
        shellquote(port),
        tag,
        shellquote(port)
    )
}

/// Build tunnel endpoint port create-or-update command
///
/// `--may-exist` makes repeated calls for the same remote a no-op. Keys are
/// taken from flow metadata in both directions.
pub fn build_add_endpoint_port_cmd(
    bridge: &str,
    port: &str,
    encap: EncapType,
    remote_address: &str,
) -> String {
    format!(
        "--may-exist add-port {} {} -- set interface {} type={} \
         options:df_default=true options:egress_pkt_mark=0 \
         options:in_key=flow options:out_key=flow options:remote_ip={}",
        shellquote(bridge),
        shellquote(port),
        shellquote(port),
        encap.as_str(),
        shellquote(remote_address)
    )
}

/// Build flow add command
///
/// A rule with the same table, priority and match replaces the existing one.
pub fn build_add_flow_cmd(bridge: &str, rule: &FlowRule) -> String {
    format!(
        "add-flow {} {}",
        shellquote(bridge),
        shellquote(&rule.to_string())
    )
}

/// Build strict flow delete command
pub fn build_del_flow_strict_cmd(bridge: &str, rule: &FlowRule) -> String {
    format!(
        "del-flows {} --strict {}",
        shellquote(bridge),
        shellquote(&rule.match_spec())
    )
}

/// Build interface address assignment command
pub fn build_add_address_cmd(address: &str, port: &str) -> String {
    format!("addr add {} dev {}", shellquote(address), shellquote(port))
}

/// Build interface bring-up command
pub fn build_set_link_up_cmd(port: &str) -> String {
    format!("link set {} up", shellquote(port))
}
