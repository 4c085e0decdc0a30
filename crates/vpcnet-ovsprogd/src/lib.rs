//! ovsprogd - OVS dataplane programmer for VPC overlays
//!
//! Builds an integration bridge and a tunnel bridge joined by a patch pair,
//! admits local VM ports into per-VPC isolation tags, and keeps a flood rule
//! per VPC that replicates traffic to every known remote endpoint.

pub mod bridge;
pub mod commands;
pub mod exec;
pub mod flows;
pub mod intents;
pub mod logging;
mod programmer;
pub mod registry;
mod types;

pub use bridge::{BridgeBootstrapper, BridgeState};
pub use flows::FlowRule;
pub use intents::{apply_all, ApplyReport, Intent, IntentFile, IntentOutcome, NeighborIntent, PortIntent};
pub use programmer::OvsProgrammer;
pub use registry::{InMemoryVlanRegistry, VlanRegistry};
pub use types::*;
