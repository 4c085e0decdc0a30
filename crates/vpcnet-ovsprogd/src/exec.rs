//! Best-effort command issuance
//!
//! A [`CommandBatch`] runs every command it is given, even after an earlier
//! one failed, and remembers only the last failure. Operations that mutate
//! the switch in several steps use it so a single failed step never hides
//! whether later steps were attempted. A non-success result therefore means
//! "some step may not have applied", never "nothing applied".

use std::time::Duration;
use tracing::{info, warn};

use vpcnet_cfgmgr_common::{CfgMgrError, CfgMgrResult, CommandOutcome, CommandSink};

#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Bridge,
    Flow,
    System,
}

impl CommandKind {
    fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Bridge => "ovsdb",
            CommandKind::Flow => "openflow",
            CommandKind::System => "system",
        }
    }
}

/// Sequence of commands sharing one aggregate status and elapsed counter.
pub struct CommandBatch<'a> {
    sink: &'a dyn CommandSink,
    elapsed: &'a mut Duration,
    last_failure: Option<CfgMgrError>,
}

impl<'a> CommandBatch<'a> {
    /// Starts a batch adding time spent into `elapsed`.
    pub fn new(sink: &'a dyn CommandSink, elapsed: &'a mut Duration) -> Self {
        Self {
            sink,
            elapsed,
            last_failure: None,
        }
    }

    /// Runs a bridge command, recording failure. Returns true on success.
    pub async fn bridge(&mut self, command: &str) -> bool {
        let outcome = self.sink.run_bridge_command(command).await;
        self.record(CommandKind::Bridge, command, outcome, true)
    }

    /// Runs a flow command, recording failure. Returns true on success.
    pub async fn flow(&mut self, command: &str) -> bool {
        let outcome = self.sink.run_flow_command(command).await;
        self.record(CommandKind::Flow, command, outcome, true)
    }

    /// Runs a host command, recording failure. Returns true on success.
    pub async fn system(&mut self, command: &str) -> bool {
        let outcome = self.sink.run_system_command(command).await;
        self.record(CommandKind::System, command, outcome, true)
    }

    /// Runs a bridge query whose non-zero exit is an answer, not a failure.
    pub async fn query(&mut self, command: &str) -> bool {
        let outcome = self.sink.run_bridge_command(command).await;
        self.record(CommandKind::Bridge, command, outcome, false)
    }

    /// Ends the batch, yielding the last failure if there was one.
    pub fn finish(self) -> CfgMgrResult<()> {
        match self.last_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(
        &mut self,
        kind: CommandKind,
        command: &str,
        outcome: CommandOutcome,
        counts_as_failure: bool,
    ) -> bool {
        *self.elapsed += outcome.elapsed;

        info!(
            kind = kind.as_str(),
            command = %command,
            elapsed_ns = outcome.elapsed.as_nanos() as u64,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            rc = outcome.exit_code,
            "Elapsed time for {} client call",
            kind.as_str()
        );

        if outcome.success() {
            return true;
        }

        if counts_as_failure {
            warn!(kind = kind.as_str(), command = %command, rc = outcome.exit_code, "Step failed, continuing");
            self.last_failure = Some(CfgMgrError::command_failed(command, outcome.exit_code));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpcnet_cfgmgr_test::SimulatedSwitch;

    #[tokio::test]
    async fn test_last_failure_wins_and_all_steps_run() {
        let switch = SimulatedSwitch::new()
            .fail_on("add-br \"br-a\"", 3)
            .fail_on("add-br \"br-b\"", 4);
        let mut elapsed = Duration::ZERO;

        let mut batch = CommandBatch::new(&switch, &mut elapsed);
        assert!(!batch.bridge("add-br \"br-a\"").await);
        assert!(!batch.bridge("add-br \"br-b\"").await);
        assert!(batch.bridge("add-br \"br-c\"").await);

        match batch.finish() {
            Err(CfgMgrError::CommandFailed { command, exit_code }) => {
                assert_eq!(command, "add-br \"br-b\"");
                assert_eq!(exit_code, 4);
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
        assert_eq!(switch.bridge_commands().len(), 3);
    }

    #[tokio::test]
    async fn test_query_does_not_fail_batch() {
        let switch = SimulatedSwitch::new();
        let mut elapsed = Duration::ZERO;

        let mut batch = CommandBatch::new(&switch, &mut elapsed);
        assert!(!batch.query("br-exists \"br-int\"").await);
        assert!(batch.finish().is_ok());
    }

    #[tokio::test]
    async fn test_elapsed_accumulates() {
        let switch = SimulatedSwitch::new()
            .with_bridges(&["br-tun"])
            .with_latency(Duration::from_millis(5));
        let mut elapsed = Duration::from_millis(100);

        let mut batch = CommandBatch::new(&switch, &mut elapsed);
        batch.flow("dump-flows \"br-tun\"").await;
        batch.system("link set \"p0\" up").await;
        batch.finish().unwrap();

        assert!(elapsed >= Duration::from_millis(110));
    }
}
