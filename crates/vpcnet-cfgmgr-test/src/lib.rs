//! Test infrastructure for vpcnet dataplane daemons
//!
//! Provides:
//! - A simulated OVS switch implementing the command sink
//! - Test fixtures for common VPC scenarios
//! - Flow table verification helpers and a packet walker

pub mod fixtures;
mod switch;
mod verification;

pub use fixtures::*;
pub use switch::{tokenize, CommandKind, InstalledFlow, RecordedCommand, SimulatedSwitch};
pub use verification::*;
