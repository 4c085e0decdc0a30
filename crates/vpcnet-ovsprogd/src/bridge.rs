//! Integration/tunnel bridge bootstrap

use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use vpcnet_cfgmgr_common::{BridgeConfig, CfgMgrError, CfgMgrResult, CommandSink};

use crate::commands::{
    build_add_bridge_cmd, build_add_flow_cmd, build_add_port_cmd, build_bridge_exists_cmd,
    build_set_patch_peer_cmd, build_set_patch_type_cmd,
};
use crate::exec::CommandBatch;
use crate::flows::FlowRule;

/// Observed combination of the two bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Both bridges exist.
    Ready,
    /// Neither bridge exists.
    Absent,
    /// Exactly one bridge exists.
    Partial { integration: bool, tunnel: bool },
}

impl BridgeState {
    /// Classifies independent existence checks.
    pub fn classify(integration: bool, tunnel: bool) -> Self {
        match (integration, tunnel) {
            (true, true) => BridgeState::Ready,
            (false, false) => BridgeState::Absent,
            _ => BridgeState::Partial {
                integration,
                tunnel,
            },
        }
    }
}

/// Creates the two-bridge topology exactly once.
///
/// The check-and-create sequence runs under one lock so that no caller can
/// observe a half-built topology. Nothing else in the programmer takes this
/// lock.
#[derive(Debug)]
pub struct BridgeBootstrapper {
    bridges: BridgeConfig,
    lock: Mutex<()>,
}

impl BridgeBootstrapper {
    pub fn new(bridges: BridgeConfig) -> Self {
        Self {
            bridges,
            lock: Mutex::new(()),
        }
    }

    pub fn bridges(&self) -> &BridgeConfig {
        &self.bridges
    }

    /// Ensures both bridges exist and are patched together.
    ///
    /// * both present: no-op
    /// * both absent: create bridges, patch pair and baseline flows
    /// * one present: [`CfgMgrError::InvalidEnvironment`], nothing created
    ///
    /// During creation every step is attempted; the result is the last
    /// failed step, if any.
    #[instrument(skip_all)]
    pub async fn ensure_bridges(&self, sink: &dyn CommandSink) -> CfgMgrResult<()> {
        let b = &self.bridges;
        let mut elapsed = Duration::ZERO;

        let _guard = self.lock.lock().await;

        let result = {
            let mut batch = CommandBatch::new(sink, &mut elapsed);
            let integration = batch.query(&build_bridge_exists_cmd(&b.integration)).await;
            let tunnel = batch.query(&build_bridge_exists_cmd(&b.tunnel)).await;

            match BridgeState::classify(integration, tunnel) {
                BridgeState::Ready => {
                    debug!("Bridges {} and {} already present", b.integration, b.tunnel);
                    batch.finish()
                }
                BridgeState::Absent => {
                    info!("Creating bridges {} and {}", b.integration, b.tunnel);
                    Self::create_topology(b, &mut batch).await;
                    batch.finish()
                }
                BridgeState::Partial {
                    integration,
                    tunnel,
                } => {
                    error!(
                        "Invalid environment {}={} and {}={}, cannot proceed",
                        b.integration, integration, b.tunnel, tunnel
                    );
                    Err(CfgMgrError::invalid_environment(format!(
                        "{}={} {}={}",
                        b.integration, integration, b.tunnel, tunnel
                    )))
                }
            }
        };

        debug!(elapsed_us = elapsed.as_micros() as u64, ok = result.is_ok(), "Bridge check done");
        result
    }

    async fn create_topology(b: &BridgeConfig, batch: &mut CommandBatch<'_>) {
        batch.bridge(&build_add_bridge_cmd(&b.integration)).await;
        batch.bridge(&build_add_bridge_cmd(&b.tunnel)).await;

        // Patch pair: each side points at the other by name
        for (bridge, port, peer) in [
            (&b.integration, &b.integration_patch, &b.tunnel_patch),
            (&b.tunnel, &b.tunnel_patch, &b.integration_patch),
        ] {
            batch.bridge(&build_add_port_cmd(bridge, port)).await;
            batch.bridge(&build_set_patch_type_cmd(port)).await;
            batch.bridge(&build_set_patch_peer_cmd(port, peer)).await;
        }

        batch
            .flow(&build_add_flow_cmd(
                &b.tunnel,
                &FlowRule::from_integration(&b.tunnel_patch),
            ))
            .await;
        batch
            .flow(&build_add_flow_cmd(&b.tunnel, &FlowRule::flood_default()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpcnet_cfgmgr_test::SimulatedSwitch;

    fn bootstrapper() -> BridgeBootstrapper {
        BridgeBootstrapper::new(BridgeConfig::default())
    }

    #[test]
    fn test_classify() {
        assert_eq!(BridgeState::classify(true, true), BridgeState::Ready);
        assert_eq!(BridgeState::classify(false, false), BridgeState::Absent);
        assert_eq!(
            BridgeState::classify(true, false),
            BridgeState::Partial {
                integration: true,
                tunnel: false
            }
        );
        assert_eq!(
            BridgeState::classify(false, true),
            BridgeState::Partial {
                integration: false,
                tunnel: true
            }
        );
    }

    #[tokio::test]
    async fn test_creates_topology_when_absent() {
        let switch = SimulatedSwitch::new();
        bootstrapper().ensure_bridges(&switch).await.unwrap();

        assert!(switch.has_bridge("br-int"));
        assert!(switch.has_bridge("br-tun"));
        assert_eq!(switch.patch_peer("patch-tun").as_deref(), Some("patch-int"));
        assert_eq!(switch.patch_peer("patch-int").as_deref(), Some("patch-tun"));
        assert!(switch.ports("br-int").contains(&"patch-tun".to_string()));
        assert!(switch.ports("br-tun").contains(&"patch-int".to_string()));

        let flows = switch.flows("br-tun");
        assert_eq!(flows.len(), 2);
        assert!(flows
            .iter()
            .any(|f| f.table == 0 && f.match_field("in_port") == Some("patch-int")
                && f.actions == vec!["resubmit(,2)".to_string()]));
        assert!(flows
            .iter()
            .any(|f| f.table == 2 && f.priority == 0 && f.actions == vec!["resubmit(,22)".to_string()]));
    }

    #[tokio::test]
    async fn test_noop_when_ready() {
        let switch = SimulatedSwitch::new().with_bridges(&["br-int", "br-tun"]);
        bootstrapper().ensure_bridges(&switch).await.unwrap();

        // Only the two existence checks
        let cmds = switch.bridge_commands();
        assert_eq!(cmds.len(), 2);
        assert!(cmds.iter().all(|c| c.starts_with("br-exists")));
        assert!(switch.flow_commands().is_empty());
    }

    #[tokio::test]
    async fn test_partial_is_invalid_environment() {
        let switch = SimulatedSwitch::new().with_bridges(&["br-int"]);
        let err = bootstrapper().ensure_bridges(&switch).await.unwrap_err();

        assert!(matches!(err, CfgMgrError::InvalidEnvironment { .. }));
        assert!(err.to_string().contains("br-int=true br-tun=false"));
        assert!(switch
            .bridge_commands()
            .iter()
            .all(|c| c.starts_with("br-exists")));
        assert!(switch.flow_commands().is_empty());
        assert!(!switch.has_bridge("br-tun"));
    }

    #[tokio::test]
    async fn test_creation_continues_after_failure() {
        let switch = SimulatedSwitch::new().fail_on("add-br \"br-int\"", 1);
        let err = bootstrapper().ensure_bridges(&switch).await.unwrap_err();

        assert!(matches!(err, CfgMgrError::CommandFailed { exit_code: 1, .. }));
        // Everything after the failed step was still attempted
        assert!(switch.has_bridge("br-tun"));
        assert_eq!(switch.flows("br-tun").len(), 2);
        assert_eq!(switch.bridge_commands().len(), 10);
    }

    #[tokio::test]
    async fn test_custom_bridge_names() {
        let switch = SimulatedSwitch::new();
        let bridges = BridgeConfig {
            integration: "br-vm".to_string(),
            tunnel: "br-overlay".to_string(),
            integration_patch: "vm-to-ovl".to_string(),
            tunnel_patch: "ovl-to-vm".to_string(),
        };
        BridgeBootstrapper::new(bridges)
            .ensure_bridges(&switch)
            .await
            .unwrap();

        assert!(switch.has_bridge("br-vm"));
        assert_eq!(switch.patch_peer("vm-to-ovl").as_deref(), Some("ovl-to-vm"));
        assert!(switch
            .flows("br-overlay")
            .iter()
            .any(|f| f.match_field("in_port") == Some("ovl-to-vm")));
    }
}
