//! In-process switch model implementing [`CommandSink`]
//!
//! Understands the subset of `ovs-vsctl`, `ovs-ofctl` and `ip` syntax that
//! the programmer emits. Bridge commands are applied atomically: if any
//! `--`-separated sub-command fails, none of them take effect.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::trace;

use vpcnet_cfgmgr_common::{CommandOutcome, CommandSink};

/// Exit code for a generic tool error.
const EXIT_ERROR: i32 = 1;

/// Exit code `br-exists` uses for a missing bridge.
const EXIT_NO_BRIDGE: i32 = 2;

/// Priority `ovs-ofctl` assigns when a rule names none.
const OFCTL_DEFAULT_PRIORITY: u16 = 32768;

/// Tool a command was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Bridge,
    Flow,
    System,
}

/// One command as received by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub kind: CommandKind,
    pub command: String,
    pub exit_code: i32,
}

/// A rule currently installed in a bridge's flow tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFlow {
    pub table: u8,
    pub priority: u16,
    pub matches: Vec<(String, String)>,
    pub actions: Vec<String>,
}

impl InstalledFlow {
    /// Returns the value of a match field, if the rule matches on it.
    pub fn match_field(&self, field: &str) -> Option<&str> {
        self.matches
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the ports named by `output:` actions, in order.
    pub fn outputs(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| a.strip_prefix("output:"))
            .collect()
    }

    fn same_match(&self, other: &InstalledFlow) -> bool {
        if self.table != other.table || self.priority != other.priority {
            return false;
        }
        let mut a = self.matches.clone();
        let mut b = other.matches.clone();
        a.sort();
        b.sort();
        a == b
    }
}

#[derive(Debug, Clone, Default)]
struct Port {
    columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct OvsState {
    /// Bridge name to its ports in attach order
    bridges: BTreeMap<String, Vec<String>>,
    ports: HashMap<String, Port>,
    /// Interface name to `type` and `options:*` columns
    interfaces: HashMap<String, BTreeMap<String, String>>,
    flows: BTreeMap<String, Vec<InstalledFlow>>,
}

#[derive(Debug, Default)]
struct HostState {
    addresses: HashMap<String, Vec<String>>,
    links_up: Vec<String>,
}

#[derive(Debug, Default)]
struct SwitchState {
    ovs: OvsState,
    host: HostState,
    log: Vec<RecordedCommand>,
}

/// Simulated OVS switch plus host networking.
///
/// # Example
///
/// ```ignore
/// let switch = SimulatedSwitch::new()
///     .with_bridges(&["br-int", "br-tun"])
///     .fail_on("add-flow", 1);
/// ```
#[derive(Debug, Default)]
pub struct SimulatedSwitch {
    state: Mutex<SwitchState>,
    failures: Vec<(String, i32)>,
    latency: Duration,
}

impl SimulatedSwitch {
    /// Creates a switch with no bridges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates empty bridges.
    pub fn with_bridges(self, bridges: &[&str]) -> Self {
        {
            let mut state = self.state.lock();
            for bridge in bridges {
                state.ovs.bridges.entry(bridge.to_string()).or_default();
            }
        }
        self
    }

    /// Makes every command containing `pattern` exit with `exit_code`
    /// without taking effect. The first matching pattern wins.
    pub fn fail_on(mut self, pattern: &str, exit_code: i32) -> Self {
        self.failures.push((pattern.to_string(), exit_code));
        self
    }

    /// Delays every command by `latency` and reports it as elapsed time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn has_bridge(&self, bridge: &str) -> bool {
        self.state.lock().ovs.bridges.contains_key(bridge)
    }

    /// Ports attached to `bridge`, in attach order.
    pub fn ports(&self, bridge: &str) -> Vec<String> {
        self.state
            .lock()
            .ovs
            .bridges
            .get(bridge)
            .cloned()
            .unwrap_or_default()
    }

    /// A port's record columns other than its name (e.g. `tag`).
    pub fn port_column(&self, port: &str, column: &str) -> Option<String> {
        self.state
            .lock()
            .ovs
            .ports
            .get(port)
            .and_then(|p| p.columns.get(column).cloned())
    }

    /// An interface's `type` and `options:*` columns.
    pub fn interface_options(&self, interface: &str) -> HashMap<String, String> {
        self.state
            .lock()
            .ovs
            .interfaces
            .get(interface)
            .map(|cols| cols.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// The peer of a patch interface.
    pub fn patch_peer(&self, interface: &str) -> Option<String> {
        let state = self.state.lock();
        let cols = state.ovs.interfaces.get(interface)?;
        if cols.get("type").map(String::as_str) != Some("patch") {
            return None;
        }
        cols.get("options:peer").cloned()
    }

    /// Installed rules on `bridge`, in install order.
    pub fn flows(&self, bridge: &str) -> Vec<InstalledFlow> {
        self.state
            .lock()
            .ovs
            .flows
            .get(bridge)
            .cloned()
            .unwrap_or_default()
    }

    pub fn flows_in_table(&self, bridge: &str, table: u8) -> Vec<InstalledFlow> {
        self.flows(bridge)
            .into_iter()
            .filter(|f| f.table == table)
            .collect()
    }

    /// Addresses assigned to a host interface, in order.
    pub fn addresses(&self, interface: &str) -> Vec<String> {
        self.state
            .lock()
            .host
            .addresses
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_link_up(&self, interface: &str) -> bool {
        self.state.lock().host.links_up.iter().any(|l| l == interface)
    }

    /// Every command received, including failed ones.
    pub fn history(&self) -> Vec<RecordedCommand> {
        self.state.lock().log.clone()
    }

    pub fn all_commands(&self) -> Vec<String> {
        self.history().into_iter().map(|c| c.command).collect()
    }

    pub fn bridge_commands(&self) -> Vec<String> {
        self.commands_of(CommandKind::Bridge)
    }

    pub fn flow_commands(&self) -> Vec<String> {
        self.commands_of(CommandKind::Flow)
    }

    pub fn system_commands(&self) -> Vec<String> {
        self.commands_of(CommandKind::System)
    }

    /// Number of `add-br` commands received.
    pub fn add_bridge_count(&self) -> usize {
        self.bridge_commands()
            .iter()
            .filter(|c| tokenize(c).first().map(String::as_str) == Some("add-br"))
            .count()
    }

    fn commands_of(&self, kind: CommandKind) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.command.clone())
            .collect()
    }

    async fn execute(&self, kind: CommandKind, command: &str) -> CommandOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let forced = self
            .failures
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, code)| *code);

        let mut state = self.state.lock();
        let exit_code = match forced {
            Some(code) => code,
            None => match kind {
                CommandKind::Bridge => apply_bridge_command(&mut state.ovs, command),
                CommandKind::Flow => apply_flow_command(&mut state.ovs, command),
                CommandKind::System => apply_system_command(&mut state.host, command),
            },
        };

        trace!(?kind, command, exit_code, "Simulated command");
        state.log.push(RecordedCommand {
            kind,
            command: command.to_string(),
            exit_code,
        });

        CommandOutcome::new(exit_code, self.latency)
    }
}

#[async_trait]
impl CommandSink for SimulatedSwitch {
    async fn run_bridge_command(&self, command: &str) -> CommandOutcome {
        self.execute(CommandKind::Bridge, command).await
    }

    async fn run_flow_command(&self, command: &str) -> CommandOutcome {
        self.execute(CommandKind::Flow, command).await
    }

    async fn run_system_command(&self, command: &str) -> CommandOutcome {
        self.execute(CommandKind::System, command).await
    }
}

/// Splits a command line the way `/bin/sh` would for double-quoted words.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    tokens.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        tokens.push(current);
    }
    tokens
}

fn apply_bridge_command(ovs: &mut OvsState, command: &str) -> i32 {
    let tokens = tokenize(command);
    if tokens.first().map(String::as_str) == Some("br-exists") {
        return match tokens.get(1) {
            Some(bridge) if ovs.bridges.contains_key(bridge) => 0,
            Some(_) => EXIT_NO_BRIDGE,
            None => EXIT_ERROR,
        };
    }

    let mut staged = ovs.clone();
    for sub in tokens.split(|t| t == "--") {
        if apply_vsctl(&mut staged, sub).is_err() {
            return EXIT_ERROR;
        }
    }
    *ovs = staged;
    0
}

fn apply_vsctl(ovs: &mut OvsState, tokens: &[String]) -> Result<(), ()> {
    let may_exist = tokens.iter().any(|t| t == "--may-exist");
    let args: Vec<&str> = tokens
        .iter()
        .filter(|t| !t.starts_with("--"))
        .map(String::as_str)
        .collect();

    match args.as_slice() {
        ["add-br", bridge] => {
            if ovs.bridges.contains_key(*bridge) {
                return if may_exist { Ok(()) } else { Err(()) };
            }
            ovs.bridges.insert(bridge.to_string(), Vec::new());
            Ok(())
        }
        ["add-port", bridge, port, columns @ ..] => {
            if !ovs.bridges.contains_key(*bridge) {
                return Err(());
            }
            if ovs.ports.contains_key(*port) {
                return if may_exist { Ok(()) } else { Err(()) };
            }
            let mut record = Port::default();
            for col in columns {
                let (k, v) = col.split_once('=').ok_or(())?;
                record.columns.insert(k.to_string(), v.to_string());
            }
            ovs.ports.insert(port.to_string(), record);
            ovs.interfaces.insert(port.to_string(), BTreeMap::new());
            if let Some(ports) = ovs.bridges.get_mut(*bridge) {
                ports.push(port.to_string());
            }
            Ok(())
        }
        ["set", table, record, columns @ ..] if table.eq_ignore_ascii_case("interface") => {
            let interface = ovs.interfaces.get_mut(*record).ok_or(())?;
            for col in columns {
                let (k, v) = col.split_once('=').ok_or(())?;
                interface.insert(k.to_string(), v.to_string());
            }
            Ok(())
        }
        _ => Err(()),
    }
}

fn apply_flow_command(ovs: &mut OvsState, command: &str) -> i32 {
    let tokens = tokenize(command);
    let strict = tokens.iter().any(|t| t == "--strict");
    let args: Vec<&str> = tokens
        .iter()
        .filter(|t| !t.starts_with("--"))
        .map(String::as_str)
        .collect();

    let bridge = match args.get(1) {
        Some(b) if ovs.bridges.contains_key(*b) => b.to_string(),
        _ => return EXIT_ERROR,
    };
    let flows = ovs.flows.entry(bridge).or_default();

    match args.as_slice() {
        ["add-flow", _, rule] => match parse_flow(rule) {
            Some(flow) => {
                match flows.iter_mut().find(|f| f.same_match(&flow)) {
                    Some(existing) => *existing = flow,
                    None => flows.push(flow),
                }
                0
            }
            None => EXIT_ERROR,
        },
        ["del-flows", _] => {
            flows.clear();
            0
        }
        ["del-flows", _, spec] => match parse_flow(spec) {
            Some(target) if strict => {
                flows.retain(|f| !f.same_match(&target));
                0
            }
            Some(target) => {
                flows.retain(|f| {
                    f.table != target.table
                        || !target
                            .matches
                            .iter()
                            .all(|(k, v)| f.match_field(k) == Some(v.as_str()))
                });
                0
            }
            None => EXIT_ERROR,
        },
        ["dump-flows", _] => 0,
        _ => EXIT_ERROR,
    }
}

/// Parses `table=..,priority=..,field=value,...[,actions=...]`.
fn parse_flow(text: &str) -> Option<InstalledFlow> {
    let (match_part, action_part) = match text.find("actions=") {
        Some(idx) => (
            text[..idx].trim_end_matches(','),
            Some(&text[idx + "actions=".len()..]),
        ),
        None => (text, None),
    };

    let mut flow = InstalledFlow {
        table: 0,
        priority: OFCTL_DEFAULT_PRIORITY,
        matches: Vec::new(),
        actions: Vec::new(),
    };

    for term in match_part.split(',').filter(|t| !t.is_empty()) {
        let (field, value) = term.split_once('=')?;
        match field {
            "table" => flow.table = value.parse().ok()?,
            "priority" => flow.priority = value.parse().ok()?,
            _ => flow.matches.push((field.to_string(), value.to_string())),
        }
    }

    if let Some(actions) = action_part {
        flow.actions = split_actions(actions);
        if flow.actions.is_empty() {
            return None;
        }
    }
    Some(flow)
}

/// Splits an action list on commas outside parentheses and brackets.
fn split_actions(actions: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in actions.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn apply_system_command(host: &mut HostState, command: &str) -> i32 {
    let tokens = tokenize(command);
    let args: Vec<&str> = tokens.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["addr", "add", address, "dev", interface] => {
            let list = host.addresses.entry(interface.to_string()).or_default();
            if list.iter().any(|a| a == address) {
                // RTNETLINK answers: File exists
                return EXIT_ERROR;
            }
            list.push(address.to_string());
            0
        }
        ["link", "set", interface, "up"] => {
            if !host.links_up.iter().any(|l| l == interface) {
                host.links_up.push(interface.to_string());
            }
            0
        }
        _ => EXIT_ERROR,
    }
}
