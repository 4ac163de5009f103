//! `readerlink`: run reader sessions against simulated hardware.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `simulate inventory` | Connect a reader over two links and collect inventory passes |
//! | `simulate change-epc <hex>` | Rewrite the EPC of a single simulated tag |
//! | `config show` | Print the effective configuration |
//! | `config init` | Write a default configuration file |
//! | `config path` | Print the configuration file path |
//!
//! # Configuration
//!
//! Settings are read from `<config dir>/readerlink/config.toml`, or from the
//! file given with `--config` (or `READERLINK_CONFIG`). Sections are
//! `[session]`, `[signal]`, `[inventory]` and `[epc_changer]`; missing keys
//! take their defaults.

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SimulateScenario};
use crate::commands::{cmd_config, cmd_simulate_change_epc, cmd_simulate_inventory};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet keeps warnings; verbose shows every state transition.
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.config.as_deref(), cli.quiet)?,
        Commands::Simulate { scenario } => {
            let config = Config::load_validated(cli.config.as_deref())
                .context("Failed to load configuration")?;
            tracing::debug!("Loaded configuration: {:?}", config);

            match scenario {
                SimulateScenario::Inventory {
                    passes,
                    tags,
                    format,
                } => cmd_simulate_inventory(&config, passes, tags, format, cli.quiet).await?,
                SimulateScenario::ChangeEpc { epc, current, rssi } => {
                    cmd_simulate_change_epc(&config, &epc, &current, rssi, cli.quiet).await?
                }
            }
        }
    }

    Ok(())
}
