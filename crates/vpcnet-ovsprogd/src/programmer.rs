//! OvsProgrammer - VPC port admission and neighbor fan-out
//!
//! Programming flow:
//! 1. Bootstrap the bridge pair (shared, serialized)
//! 2. Resolve the VPC's isolation tag and membership in the registry
//! 3. Issue bridge/flow commands best-effort through the sink

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use vpcnet_cfgmgr_common::{CfgMgrError, CfgMgrResult, CommandSink, OvsProgConfig};

use crate::bridge::BridgeBootstrapper;
use crate::commands::{
    build_add_address_cmd, build_add_endpoint_port_cmd, build_add_flow_cmd,
    build_add_local_port_cmd, build_del_flow_strict_cmd, build_set_link_up_cmd,
};
use crate::exec::CommandBatch;
use crate::flows::FlowRule;
use crate::registry::VlanRegistry;
use crate::types::{endpoint_port_name, EncapType, IsolationTag, TunnelId};

/// Programs the integration and tunnel bridges for VPC intents.
///
/// Shared across tasks behind an `Arc`; every method takes `&self`.
pub struct OvsProgrammer {
    config: OvsProgConfig,
    sink: Arc<dyn CommandSink>,
    registry: Arc<dyn VlanRegistry>,
    bootstrapper: BridgeBootstrapper,
    /// Held from the table 4 install through the stale rule removal, so a
    /// removal never races a concurrent rebind of the same tunnel id.
    decap_lock: Mutex<()>,
}

impl OvsProgrammer {
    /// Creates a programmer over the given sink and registry.
    pub fn new(
        config: OvsProgConfig,
        sink: Arc<dyn CommandSink>,
        registry: Arc<dyn VlanRegistry>,
    ) -> Self {
        let bootstrapper = BridgeBootstrapper::new(config.bridges.clone());
        info!(
            integration = %config.bridges.integration,
            tunnel = %config.bridges.tunnel,
            local_apply = config.local_apply,
            "OvsProgrammer initialized"
        );

        Self {
            config,
            sink,
            registry,
            bootstrapper,
            decap_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OvsProgConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn VlanRegistry> {
        &self.registry
    }

    /// Ensures the bridge pair exists. See [`BridgeBootstrapper::ensure_bridges`].
    pub async fn ensure_bridges(&self) -> CfgMgrResult<()> {
        self.bootstrapper.ensure_bridges(self.sink.as_ref()).await
    }

    /// Admits a local VM port into a VPC.
    ///
    /// Allocates (or reuses) the VPC's isolation tag, records the port and
    /// binds `tunnel_id` to the tag in table 4. With `local_apply` the port
    /// is also created on the integration bridge, addressed and brought up.
    ///
    /// Time spent in commands is added to `elapsed`. Command failures do not
    /// stop later steps and do not undo registry changes; the last one is
    /// returned.
    #[instrument(skip(self, elapsed))]
    pub async fn admit_port(
        &self,
        vpc_id: &str,
        port_name: &str,
        virtual_address: &str,
        tunnel_id: TunnelId,
        elapsed: &mut Duration,
    ) -> CfgMgrResult<()> {
        debug!("admit_port ---> Entering");

        require_non_empty("vpc_id", vpc_id)?;
        require_non_empty("port_name", port_name)?;
        require_non_empty("virtual_address", virtual_address)?;
        require_tunnel_id(tunnel_id)?;

        self.bootstrap_or_invalid().await?;

        let tag = self.registry.get_or_create_tag(vpc_id)?;
        self.registry.add_local_port(vpc_id, port_name)?;

        let bridges = &self.config.bridges;
        let mut batch = CommandBatch::new(self.sink.as_ref(), elapsed);

        if self.config.local_apply {
            batch
                .bridge(&build_add_local_port_cmd(&bridges.integration, port_name, tag))
                .await;
            batch
                .system(&build_add_address_cmd(virtual_address, port_name))
                .await;
            batch.system(&build_set_link_up_cmd(port_name)).await;
        }

        let _decap = self.decap_lock.lock().await;
        batch
            .flow(&build_add_flow_cmd(
                &bridges.tunnel,
                &FlowRule::decap(tunnel_id, tag, &bridges.tunnel_patch),
            ))
            .await;

        if let Some(stale) = self.registry.bind_tunnel_id(vpc_id, tunnel_id)? {
            info!(vpc_id = %vpc_id, stale, tunnel_id, "Removing stale decap rule");
            batch
                .flow(&build_del_flow_strict_cmd(
                    &bridges.tunnel,
                    &FlowRule::decap_match(stale),
                ))
                .await;
        }

        let result = batch.finish();
        debug!(ok = result.is_ok(), tag = %tag, "admit_port <--- Exiting");
        result
    }

    /// Registers a remote endpoint for a VPC and rebuilds its flood rule.
    ///
    /// The endpoint port is created with may-exist semantics, so repeated
    /// calls for the same remote reuse it. The table 22 rule is recomputed
    /// from the registry's complete endpoint list on every call, which picks
    /// up endpoints added concurrently by other callers.
    #[instrument(skip(self, elapsed))]
    pub async fn admit_neighbor(
        &self,
        vpc_id: &str,
        encap: EncapType,
        remote_address: &str,
        tunnel_id: TunnelId,
        elapsed: &mut Duration,
    ) -> CfgMgrResult<()> {
        debug!("admit_neighbor ---> Entering");

        require_non_empty("vpc_id", vpc_id)?;
        require_non_empty("remote_address", remote_address)?;
        require_tunnel_id(tunnel_id)?;
        let endpoint = endpoint_port_name(encap, remote_address)?;

        self.bootstrap_or_invalid().await?;

        let bridges = &self.config.bridges;
        let mut batch = CommandBatch::new(self.sink.as_ref(), elapsed);

        batch
            .bridge(&build_add_endpoint_port_cmd(
                &bridges.tunnel,
                &endpoint,
                encap,
                remote_address,
            ))
            .await;

        let tag: IsolationTag = self.registry.get_or_create_tag(vpc_id)?;
        self.registry.add_remote_endpoint(vpc_id, &endpoint)?;

        let endpoints = self
            .registry
            .remote_endpoints(vpc_id)
            .ok_or_else(|| CfgMgrError::vpc_not_found(vpc_id))?;

        batch
            .flow(&build_add_flow_cmd(
                &bridges.tunnel,
                &FlowRule::flood(tag, tunnel_id, &endpoints),
            ))
            .await;

        batch
            .flow(&build_add_flow_cmd(
                &bridges.tunnel,
                &FlowRule::from_endpoint(&endpoint),
            ))
            .await;

        let result = batch.finish();
        debug!(
            ok = result.is_ok(),
            endpoint = %endpoint,
            fan_out = endpoints.len(),
            "admit_neighbor <--- Exiting"
        );
        result
    }

    async fn bootstrap_or_invalid(&self) -> CfgMgrResult<()> {
        match self.ensure_bridges().await {
            Ok(()) => Ok(()),
            Err(e @ CfgMgrError::InvalidEnvironment { .. }) => Err(e),
            Err(e) => Err(CfgMgrError::invalid_environment(format!(
                "bridge setup failed: {}",
                e
            ))),
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> CfgMgrResult<()> {
    if value.is_empty() {
        return Err(CfgMgrError::precondition(field, "is empty"));
    }
    Ok(())
}

fn require_tunnel_id(tunnel_id: TunnelId) -> CfgMgrResult<()> {
    if tunnel_id == 0 {
        return Err(CfgMgrError::precondition("tunnel_id", "is 0"));
    }
    Ok(())
}
