//! netcensus daemon - main entry point
//!
//! Runs scheduled discovery of the configured segments and serves the
//! manual-trigger API. `--discover` and `--identify` run once and exit.

mod api;
mod config;
mod registration;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netcensus")]
#[command(about = "Network device discovery and identification daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netcensus.toml")]
    config: PathBuf,

    /// Bind address for the API server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Discover a single CIDR range, print the result and exit
    #[arg(long, value_name = "CIDR", conflicts_with = "identify")]
    discover: Option<String>,

    /// Identify a single device, print it and exit
    #[arg(long, value_name = "IP")]
    identify: Option<String>,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("netcensus v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        println!("Wrote example configuration to {}", args.config.display());
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    let state = state::AppState::new(config)?;

    if let Some(cidr) = args.discover {
        info!(cidr = %cidr, "Running single discovery");
        let result = state
            .scheduler
            .discover_cidr_now(&cidr, false, None, None, &state.run_token())
            .await?;
        println!(
            "Discovered {} devices in {} ({} addresses scanned, {} ms):",
            result.devices_found(),
            cidr,
            result.total_scanned,
            result.duration().num_milliseconds()
        );
        for device in result.devices() {
            println!(
                "  - {} at {}{}",
                device.display_name(),
                device.ip_address,
                if device.is_reachable { "" } else { " (unreachable)" }
            );
            if let Some(vendor) = device.vendor {
                let kind = device.device_type.map(|t| t.to_string()).unwrap_or_default();
                println!("    Vendor: {} / {}", vendor, kind);
            }
            if let Some(model) = &device.model {
                println!("    Model: {}", model);
            }
            if let Some(version) = &device.software_version {
                println!("    Software: {}", version);
            }
            if let Some(mac) = &device.mac_address {
                println!("    MAC: {}", mac);
            }
        }
    } else if let Some(ip) = args.identify {
        info!(ip = %ip, "Identifying device");
        let options = state.engine.defaults().clone();
        let device = state
            .engine
            .identify_address(&ip, &options, &state.run_token())
            .await?;
        println!("{}", serde_json::to_string_pretty(&device)?);
    } else {
        server::run(state).await?;
    }

    Ok(())
}
