//! Command sink abstraction.
//!
//! Everything that touches the switch goes through a [`CommandSink`]. The
//! programmer never spawns processes itself, so tests can substitute a
//! simulated switch and production code uses [`ShellSink`].

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::CommandConfig;
use crate::shell;

/// Status and timing of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit status reported by the tool (0 = success).
    pub exit_code: i32,
    /// Time spent waiting for the tool.
    pub elapsed: Duration,
}

impl CommandOutcome {
    /// Exit code used when the command could not be run at all.
    pub const SPAWN_FAILURE: i32 = -1;

    /// Creates an outcome.
    pub fn new(exit_code: i32, elapsed: Duration) -> Self {
        Self { exit_code, elapsed }
    }

    /// Returns true if the command succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes fully-formed configuration commands against the local switch.
///
/// Command text excludes the tool path: `"br-exists br-int"` for the bridge
/// tool, `"add-flow br-tun ..."` for the flow tool, `"link set p0 up"` for
/// the system `ip` tool.
///
/// Implementations block the calling task until the tool returns and never
/// retry.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Runs an OVSDB bridge/port management command.
    async fn run_bridge_command(&self, command: &str) -> CommandOutcome;

    /// Runs an OpenFlow flow-table command.
    async fn run_flow_command(&self, command: &str) -> CommandOutcome;

    /// Runs a host networking command.
    async fn run_system_command(&self, command: &str) -> CommandOutcome;
}

/// [`CommandSink`] that shells out to the configured OVS and `ip` binaries.
#[derive(Debug, Clone)]
pub struct ShellSink {
    commands: CommandConfig,
}

impl ShellSink {
    /// Creates a sink using the given tool paths.
    pub fn new(commands: CommandConfig) -> Self {
        Self { commands }
    }

    async fn run(&self, tool: &str, command: &str) -> CommandOutcome {
        let full = format!("{} {}", tool, command);
        match shell::exec(&full).await {
            Ok(result) => CommandOutcome::new(result.exit_code, result.elapsed),
            Err(e) => {
                warn!(command = %full, error = %e, "Could not run command");
                CommandOutcome::new(CommandOutcome::SPAWN_FAILURE, Duration::ZERO)
            }
        }
    }
}

impl Default for ShellSink {
    fn default() -> Self {
        Self::new(CommandConfig::default())
    }
}

#[async_trait]
impl CommandSink for ShellSink {
    async fn run_bridge_command(&self, command: &str) -> CommandOutcome {
        self.run(&self.commands.ovs_vsctl, command).await
    }

    async fn run_flow_command(&self, command: &str) -> CommandOutcome {
        self.run(&self.commands.ovs_ofctl, command).await
    }

    async fn run_system_command(&self, command: &str) -> CommandOutcome {
        self.run(&self.commands.ip, command).await
    }
}
