//! Intent files and concurrent application
//!
//! An intent file lists local ports and remote neighbors to program:
//!
//! ```toml
//! [[port]]
//! vpc_id = "vpc-1"
//! port_name = "port-a"
//! virtual_address = "10.0.0.5/24"
//! tunnel_id = 42
//!
//! [[neighbor]]
//! vpc_id = "vpc-1"
//! encap = "vxlan"
//! remote_address = "192.168.1.10"
//! tunnel_id = 42
//! ```
//!
//! Every intent runs in its own task against one shared programmer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use vpcnet_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use crate::programmer::OvsProgrammer;
use crate::types::{EncapType, TunnelId};

/// A local VM port to admit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortIntent {
    pub vpc_id: String,
    pub port_name: String,
    pub virtual_address: String,
    pub tunnel_id: TunnelId,
}

/// A remote host to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborIntent {
    pub vpc_id: String,
    #[serde(default)]
    pub encap: EncapType,
    pub remote_address: String,
    pub tunnel_id: TunnelId,
}

/// Parsed intent file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFile {
    #[serde(default, rename = "port")]
    pub ports: Vec<PortIntent>,
    #[serde(default, rename = "neighbor")]
    pub neighbors: Vec<NeighborIntent>,
}

impl IntentFile {
    pub fn from_toml_str(content: &str) -> CfgMgrResult<Self> {
        toml::from_str(content).map_err(|e| {
            CfgMgrError::invalid_config("intents", format!("Failed to parse intent file: {}", e))
        })
    }

    pub fn load(path: impl AsRef<Path>) -> CfgMgrResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn len(&self) -> usize {
        self.ports.len() + self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ports first, then neighbors, each in file order.
    pub fn into_intents(self) -> Vec<Intent> {
        self.ports
            .into_iter()
            .map(Intent::Port)
            .chain(self.neighbors.into_iter().map(Intent::Neighbor))
            .collect()
    }
}

/// One unit of programming work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Port(PortIntent),
    Neighbor(NeighborIntent),
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Port(p) => write!(f, "port {}/{}", p.vpc_id, p.port_name),
            Intent::Neighbor(n) => {
                write!(f, "neighbor {}/{} via {}", n.vpc_id, n.remote_address, n.encap)
            }
        }
    }
}

impl Intent {
    /// Programs this intent, adding command time to `elapsed`.
    pub async fn apply(
        &self,
        programmer: &OvsProgrammer,
        elapsed: &mut Duration,
    ) -> CfgMgrResult<()> {
        match self {
            Intent::Port(p) => {
                programmer
                    .admit_port(
                        &p.vpc_id,
                        &p.port_name,
                        &p.virtual_address,
                        p.tunnel_id,
                        elapsed,
                    )
                    .await
            }
            Intent::Neighbor(n) => {
                programmer
                    .admit_neighbor(&n.vpc_id, n.encap, &n.remote_address, n.tunnel_id, elapsed)
                    .await
            }
        }
    }
}

/// Result of applying one intent.
#[derive(Debug)]
pub struct IntentOutcome {
    pub intent: Intent,
    pub result: CfgMgrResult<()>,
    pub elapsed: Duration,
}

/// Results of a whole intent file, in file order.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<IntentOutcome>,
}

impl ApplyReport {
    /// Sum of command time across all intents.
    pub fn total_elapsed(&self) -> Duration {
        self.outcomes.iter().map(|o| o.elapsed).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &IntentOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Applies every intent concurrently, one task each.
pub async fn apply_all(programmer: Arc<OvsProgrammer>, file: IntentFile) -> ApplyReport {
    let intents = file.into_intents();
    info!(count = intents.len(), "Applying intents");

    let handles: Vec<_> = intents
        .into_iter()
        .map(|intent| {
            let programmer = Arc::clone(&programmer);
            let label = intent.clone();
            let handle = tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                let result = intent.apply(&programmer, &mut elapsed).await;
                (result, elapsed)
            });
            (label, handle)
        })
        .collect();

    let mut report = ApplyReport::default();
    for (intent, handle) in handles {
        let (result, elapsed) = match handle.await {
            Ok(done) => done,
            Err(e) => {
                error!(intent = %intent, error = %e, "Intent task aborted");
                (Err(CfgMgrError::task_aborted(e.to_string())), Duration::ZERO)
            }
        };

        match &result {
            Ok(()) => info!(intent = %intent, elapsed_us = elapsed.as_micros() as u64, "Intent applied"),
            Err(e) => error!(
                intent = %intent,
                error = %e,
                retryable = e.is_retryable(),
                "Intent failed"
            ),
        }
        report.outcomes.push(IntentOutcome {
            intent,
            result,
            elapsed,
        });
    }
    report
}
