//! Common infrastructure for vpcnet dataplane daemons.
//!
//! - [`shell`]: Shell command execution with proper quoting
//! - [`sink`]: The [`CommandSink`] seam between programming logic and the switch
//! - [`config`]: TOML configuration
//! - [`error`]: Error types shared by every crate
//!
//! # Example
//!
//! ```ignore
//! use vpcnet_cfgmgr_common::{CommandSink, OvsProgConfig, ShellSink};
//!
//! let config = OvsProgConfig::load()?;
//! let sink = ShellSink::new(config.commands.clone());
//! let outcome = sink.run_bridge_command("br-exists br-int").await;
//! ```

pub mod config;
pub mod error;
pub mod shell;
pub mod sink;

// Re-export commonly used items at crate root
pub use config::{BridgeConfig, CommandConfig, OvsProgConfig};
pub use error::{CfgMgrError, CfgMgrResult};
pub use sink::{CommandOutcome, CommandSink, ShellSink};
