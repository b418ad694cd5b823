use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

mod config;
mod daemon;
mod netpick;
mod systemd;

/// Home gateway daemon: DHCP, DNS, userspace NAT and an optional
/// WPA2 access point, all on one event loop.
#[derive(Parser)]
struct Cli {
    /// Sets a custom config file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/gatekeeper/config.toml"
    )]
    config: PathBuf,

    /// Enables verbose output on STDOUT
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(&cli) {
        Ok(()) => {
            info!("gatekeeper stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = Config::load(&cli.config)?;
    daemon::run(cfg)
}
