//! Concurrent bootstrap and admission tests
//!
//! Runs many callers on a multi-threaded runtime against one programmer and
//! a switch with per-command latency, so callers genuinely interleave.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;
use vpcnet_cfgmgr_common::{CfgMgrError, OvsProgConfig};
use vpcnet_cfgmgr_test::{remote_host, FlowVerifier, SimulatedSwitch};
use vpcnet_ovsprogd::{EncapType, InMemoryVlanRegistry, OvsProgrammer, VlanRegistry};

const CALLERS: usize = 32;

fn programmer_over(switch: Arc<SimulatedSwitch>) -> (Arc<OvsProgrammer>, Arc<InMemoryVlanRegistry>) {
    let registry = Arc::new(InMemoryVlanRegistry::new());
    let programmer = Arc::new(OvsProgrammer::new(
        OvsProgConfig::default(),
        switch,
        registry.clone(),
    ));
    (programmer, registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bootstrap_creates_once() {
    let switch = Arc::new(SimulatedSwitch::new().with_latency(Duration::from_millis(2)));
    let (programmer, _) = programmer_over(switch.clone());

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let programmer = programmer.clone();
            tokio::spawn(async move { programmer.ensure_bridges().await })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(switch.add_bridge_count(), 2);
    assert!(switch.has_bridge("br-int"));
    assert!(switch.has_bridge("br-tun"));
    assert_ok!(FlowVerifier::new(&switch, "br-tun").assert_baseline("patch-int"));
    assert_ok!(FlowVerifier::new(&switch, "br-tun").assert_rule_count(0, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bootstrap_idempotent() {
    let switch = Arc::new(SimulatedSwitch::new());
    let (programmer, _) = programmer_over(switch.clone());

    assert_ok!(programmer.ensure_bridges().await);
    let after_first = switch.bridge_commands().len();
    assert_ok!(programmer.ensure_bridges().await);

    // Second call only re-checks existence
    let later = &switch.bridge_commands()[after_first..];
    assert_eq!(later.len(), 2);
    assert!(later.iter().all(|c| c.starts_with("br-exists")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_partial_environment_never_repaired() {
    let switch = Arc::new(
        SimulatedSwitch::new()
            .with_bridges(&["br-tun"])
            .with_latency(Duration::from_millis(1)),
    );
    let (programmer, registry) = programmer_over(switch.clone());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let programmer = programmer.clone();
            tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                programmer
                    .admit_port("vpc-1", &format!("port-{}", i), "10.0.0.5/24", 42, &mut elapsed)
                    .await
            })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CfgMgrError::InvalidEnvironment { .. }));
    }

    assert_eq!(switch.add_bridge_count(), 0);
    assert!(!switch.has_bridge("br-int"));
    assert_eq!(registry.vpc_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ports_get_distinct_tags() {
    let switch = Arc::new(SimulatedSwitch::new().with_latency(Duration::from_millis(1)));
    let (programmer, registry) = programmer_over(switch.clone());

    let handles: Vec<_> = (0..CALLERS as u32)
        .map(|i| {
            let programmer = programmer.clone();
            tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                programmer
                    .admit_port(
                        &format!("vpc-{}", i),
                        &format!("port-{}", i),
                        "10.0.0.5/24",
                        100 + i,
                        &mut elapsed,
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(switch.add_bridge_count(), 2);
    let tags: HashSet<u16> = (0..CALLERS)
        .map(|i| registry.tag_of(&format!("vpc-{}", i)).unwrap().value())
        .collect();
    assert_eq!(tags.len(), CALLERS);

    let verifier = FlowVerifier::new(&switch, "br-tun");
    assert_ok!(verifier.assert_rule_count(4, CALLERS));
    for i in 0..CALLERS as u32 {
        let tag = registry.tag_of(&format!("vpc-{}", i)).unwrap().value();
        assert_eq!(verifier.decap_tag(100 + i).unwrap(), tag);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_neighbors_converge() {
    let switch = Arc::new(SimulatedSwitch::new().with_latency(Duration::from_millis(1)));
    let (programmer, registry) = programmer_over(switch.clone());

    let handles: Vec<_> = (0..16u16)
        .map(|i| {
            let programmer = programmer.clone();
            tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                programmer
                    .admit_neighbor("vpc-1", EncapType::Vxlan, &remote_host(i), 42, &mut elapsed)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let endpoints = registry.remote_endpoints("vpc-1").unwrap();
    assert_eq!(endpoints.len(), 16);

    // One more admission recomputes the flood rule from the full membership
    let mut elapsed = Duration::ZERO;
    assert_ok!(
        programmer
            .admit_neighbor("vpc-1", EncapType::Vxlan, &remote_host(0), 42, &mut elapsed)
            .await
    );

    let verifier = FlowVerifier::new(&switch, "br-tun");
    assert_eq!(verifier.flood_outputs(1).unwrap(), endpoints);
    assert_ok!(verifier.assert_rule_count(22, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rebinds_leave_one_decap_rule() {
    let switch = Arc::new(SimulatedSwitch::new().with_latency(Duration::from_millis(1)));
    let (programmer, registry) = programmer_over(switch.clone());

    let handles: Vec<_> = (0..CALLERS as u32)
        .map(|i| {
            let programmer = programmer.clone();
            tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                programmer
                    .admit_port("vpc-1", "port-a", "10.0.0.5/24", 42 + i % 2, &mut elapsed)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let bound = registry.tunnel_id_of("vpc-1").unwrap();
    let tag = registry.tag_of("vpc-1").unwrap().value();
    let verifier = FlowVerifier::new(&switch, "br-tun");
    assert_ok!(verifier.assert_rule_count(4, 1));
    assert_eq!(verifier.decap_tag(bound).unwrap(), tag);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rebinds_keep_other_vpc_rule() {
    let switch = Arc::new(SimulatedSwitch::new().with_latency(Duration::from_millis(1)));
    let (programmer, registry) = programmer_over(switch.clone());

    // vpc-1 flips between 42 and 43 while vpc-2 keeps claiming 43
    let handles: Vec<_> = (0..CALLERS as u32)
        .map(|i| {
            let programmer = programmer.clone();
            tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                if i % 3 == 0 {
                    programmer
                        .admit_port("vpc-2", "port-b", "10.0.1.5/24", 43, &mut elapsed)
                        .await
                } else {
                    programmer
                        .admit_port("vpc-1", "port-a", "10.0.0.5/24", 42 + i % 2, &mut elapsed)
                        .await
                }
            })
        })
        .collect();

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let bound: HashSet<u32> = ["vpc-1", "vpc-2"]
        .iter()
        .map(|vpc| registry.tunnel_id_of(vpc).unwrap())
        .collect();
    assert_eq!(registry.tunnel_id_of("vpc-2"), Some(43));

    let verifier = FlowVerifier::new(&switch, "br-tun");
    assert_ok!(verifier.assert_rule_count(4, bound.len()));
    for tunnel_id in bound {
        assert!(verifier.decap_tag(tunnel_id).is_ok());
    }
}
