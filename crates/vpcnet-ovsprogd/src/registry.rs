//! VPC registry: isolation tags and membership
//!
//! The registry is the only owner of per-VPC state. Each call is atomic on
//! its own; the programmer does not group calls into transactions.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use vpcnet_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use crate::types::{IsolationTag, TunnelId};

/// Per-VPC tag allocation and membership tracking.
pub trait VlanRegistry: Send + Sync {
    /// Returns the VPC's tag, allocating one on first reference.
    fn get_or_create_tag(&self, vpc_id: &str) -> CfgMgrResult<IsolationTag>;

    /// Records a local port as a member of the VPC.
    ///
    /// Adding a port twice keeps a single entry.
    fn add_local_port(&self, vpc_id: &str, port_name: &str) -> CfgMgrResult<()>;

    /// Records a remote endpoint port as a member of the VPC.
    ///
    /// Adding an endpoint twice keeps a single entry at its first position.
    fn add_remote_endpoint(&self, vpc_id: &str, endpoint: &str) -> CfgMgrResult<()>;

    /// Returns the VPC's endpoints in insertion order, or `None` for an
    /// unknown VPC.
    fn remote_endpoints(&self, vpc_id: &str) -> Option<Vec<String>>;

    /// Binds the VPC to `tunnel_id` for decapsulation.
    ///
    /// Returns the previously bound tunnel id when it differs from
    /// `tunnel_id` and no other VPC is bound to it, i.e. when its table 4
    /// rule has become stale.
    fn bind_tunnel_id(&self, vpc_id: &str, tunnel_id: TunnelId) -> CfgMgrResult<Option<TunnelId>>;

    /// Returns the tunnel id the VPC is currently bound to.
    fn tunnel_id_of(&self, vpc_id: &str) -> Option<TunnelId>;

    /// Returns the VPC's tag without allocating.
    fn tag_of(&self, vpc_id: &str) -> Option<IsolationTag>;

    /// Returns the VPC's local ports in insertion order.
    fn local_ports(&self, vpc_id: &str) -> Option<Vec<String>>;
}

#[derive(Debug, Clone)]
struct VpcEntry {
    tag: IsolationTag,
    tunnel_id: Option<TunnelId>,
    local_ports: Vec<String>,
    remote_endpoints: Vec<String>,
}

impl VpcEntry {
    fn new(tag: IsolationTag) -> Self {
        Self {
            tag,
            tunnel_id: None,
            local_ports: Vec::new(),
            remote_endpoints: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct RegistryState {
    vpcs: HashMap<String, VpcEntry>,
    next_tag: u16,
}

/// Process-local [`VlanRegistry`].
///
/// Tags are handed out sequentially from 1 and never reused.
#[derive(Debug)]
pub struct InMemoryVlanRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryVlanRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::starting_at(IsolationTag::MIN)
    }

    /// Creates an empty registry whose first tag is `first_tag`.
    pub fn starting_at(first_tag: u16) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                vpcs: HashMap::new(),
                next_tag: first_tag,
            }),
        }
    }

    /// Number of VPCs holding a tag.
    pub fn vpc_count(&self) -> usize {
        self.state.lock().vpcs.len()
    }
}

impl Default for InMemoryVlanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VlanRegistry for InMemoryVlanRegistry {
    fn get_or_create_tag(&self, vpc_id: &str) -> CfgMgrResult<IsolationTag> {
        let mut state = self.state.lock();
        if let Some(entry) = state.vpcs.get(vpc_id) {
            return Ok(entry.tag);
        }

        let tag = IsolationTag::new(state.next_tag).ok_or_else(|| CfgMgrError::TagsExhausted {
            vpc_id: vpc_id.to_string(),
        })?;
        state.next_tag += 1;
        state.vpcs.insert(vpc_id.to_string(), VpcEntry::new(tag));

        debug!(vpc_id = %vpc_id, tag = %tag, "Allocated isolation tag");
        Ok(tag)
    }

    fn add_local_port(&self, vpc_id: &str, port_name: &str) -> CfgMgrResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| CfgMgrError::vpc_not_found(vpc_id))?;

        if !entry.local_ports.iter().any(|p| p == port_name) {
            entry.local_ports.push(port_name.to_string());
        }
        Ok(())
    }

    fn add_remote_endpoint(&self, vpc_id: &str, endpoint: &str) -> CfgMgrResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| CfgMgrError::vpc_not_found(vpc_id))?;

        if !entry.remote_endpoints.iter().any(|e| e == endpoint) {
            entry.remote_endpoints.push(endpoint.to_string());
        }
        Ok(())
    }

    fn remote_endpoints(&self, vpc_id: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .vpcs
            .get(vpc_id)
            .map(|e| e.remote_endpoints.clone())
    }

    fn bind_tunnel_id(&self, vpc_id: &str, tunnel_id: TunnelId) -> CfgMgrResult<Option<TunnelId>> {
        let mut state = self.state.lock();
        let entry = state
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| CfgMgrError::vpc_not_found(vpc_id))?;

        let previous = entry.tunnel_id.replace(tunnel_id);
        let stale = previous.filter(|&old| old != tunnel_id);

        Ok(stale.filter(|&old| {
            !state
                .vpcs
                .iter()
                .any(|(id, e)| id != vpc_id && e.tunnel_id == Some(old))
        }))
    }

    fn tunnel_id_of(&self, vpc_id: &str) -> Option<TunnelId> {
        self.state.lock().vpcs.get(vpc_id).and_then(|e| e.tunnel_id)
    }

    fn tag_of(&self, vpc_id: &str) -> Option<IsolationTag> {
        self.state.lock().vpcs.get(vpc_id).map(|e| e.tag)
    }

    fn local_ports(&self, vpc_id: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .vpcs
            .get(vpc_id)
            .map(|e| e.local_ports.clone())
    }
}
