//! grouporchd entry point.
//!
//! Loads the engine configuration, wires the group manager to its
//! simulated southbound side, and runs until interrupted.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use grouporch::audit::{init_logging, AuditCategory, AuditOutcome, AuditRecord, LogStyle};
use grouporch::{audit_log, GroupOrchConfig, GroupOrchDaemon};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// SDN group reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "grouporchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Driver poll interval in milliseconds, overriding the config file
    #[arg(long)]
    poll_interval: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<GroupOrchConfig> {
    let mut config = match &args.config {
        Some(path) => GroupOrchConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => GroupOrchConfig::default(),
    };

    if let Some(interval) = args.poll_interval {
        audit_log!(
            AuditRecord::new(AuditCategory::ConfigurationChange, "grouporchd", "override_poll_interval")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "from_ms": config.driver_poll_interval_ms,
                    "to_ms": interval,
                }))
        );
        config.driver_poll_interval_ms = interval;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let style = match args.log_format {
        LogFormat::Json => LogStyle::Json,
        LogFormat::Pretty => LogStyle::Pretty,
    };
    if let Err(e) = init_logging(&args.log_level, style) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("====================================================================");
    info!("Starting grouporchd");
    info!("====================================================================");
    info!("Driver poll interval: {}ms", config.driver_poll_interval_ms);
    info!("First group id: {}", config.first_group_id);
    info!("Simulated devices: {}", config.simulated_devices.len());
    info!("Driver devices: {}", config.driver_devices.len());

    let mut daemon = GroupOrchDaemon::new(config);
    if let Err(e) = daemon.init() {
        error!("Failed to initialize daemon: {}", e);
        return ExitCode::FAILURE;
    }

    daemon
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
                Err(err) => error!("Failed to listen for ctrl-c: {}", err),
            }
        })
        .await;

    info!("====================================================================");
    info!("grouporchd shutdown complete");
    info!("====================================================================");

    ExitCode::SUCCESS
}
