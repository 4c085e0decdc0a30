//! ovsprogd - OVS dataplane programmer
//!
//! Entry point for the ovsprogd command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use vpcnet_cfgmgr_common::config::DEFAULT_CONFIG_PATH;
use vpcnet_cfgmgr_common::{OvsProgConfig, ShellSink};
use vpcnet_ovsprogd::logging::{init_logging, LogFormat};
use vpcnet_ovsprogd::{apply_all, InMemoryVlanRegistry, IntentFile, OvsProgrammer};

/// OVS dataplane programmer for VPC overlays
#[derive(Parser, Debug)]
#[command(name = "ovsprogd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Also create local ports and configure them on the host
    #[arg(long)]
    local_apply: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the integration and tunnel bridges if neither exists
    Bootstrap,
    /// Program every port and neighbor listed in an intent file
    Apply {
        /// TOML file with [[port]] and [[neighbor]] entries
        file: PathBuf,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(&args.log_level, format);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = OvsProgConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.local_apply {
        config.local_apply = true;
    }

    if let Command::ShowConfig = args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(true);
    }

    let sink = Arc::new(ShellSink::new(config.commands.clone()));
    let registry = Arc::new(InMemoryVlanRegistry::new());
    let programmer = Arc::new(OvsProgrammer::new(config, sink, registry));

    match args.command {
        Command::Bootstrap => {
            programmer.ensure_bridges().await?;
            let bridges = &programmer.config().bridges;
            info!(
                integration = %bridges.integration,
                tunnel = %bridges.tunnel,
                "Bridges ready"
            );
            Ok(true)
        }
        Command::Apply { file } => {
            let intents = IntentFile::load(&file)
                .with_context(|| format!("reading intents from {}", file.display()))?;

            let vpc_ids: BTreeSet<String> = intents
                .ports
                .iter()
                .map(|p| p.vpc_id.clone())
                .chain(intents.neighbors.iter().map(|n| n.vpc_id.clone()))
                .collect();

            let report = apply_all(programmer.clone(), intents).await;
            let failed = report.failures().count();
            info!(
                total = report.outcomes.len(),
                failed,
                elapsed_ms = report.total_elapsed().as_millis() as u64,
                "Apply complete"
            );

            let registry = programmer.registry();
            for vpc_id in &vpc_ids {
                let Some(tag) = registry.tag_of(vpc_id) else {
                    continue;
                };
                info!(
                    vpc_id = %vpc_id,
                    tag = %tag,
                    tunnel_id = ?registry.tunnel_id_of(vpc_id),
                    local_ports = registry.local_ports(vpc_id).map_or(0, |p| p.len()),
                    remote_endpoints = registry.remote_endpoints(vpc_id).map_or(0, |e| e.len()),
                    "VPC programmed"
                );
            }
            Ok(failed == 0)
        }
        Command::ShowConfig => Ok(true),
    }
}
