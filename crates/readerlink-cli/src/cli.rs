//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "readerlink")]
#[command(author, version, about = "Simulated RFID reader sessions and tag inventories", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "READERLINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session against simulated readers and tags
    Simulate {
        #[command(subcommand)]
        scenario: SimulateScenario,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Simulated scenarios
#[derive(Debug, Clone, Subcommand)]
pub enum SimulateScenario {
    /// Connect a reader over two links and collect inventory passes
    Inventory {
        /// Number of inventory passes to run
        #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=100))]
        passes: u32,

        /// Number of distinct tags in the field
        #[arg(short, long, default_value = "8", value_parser = clap::value_parser!(u32).range(1..=1000))]
        tags: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Rewrite the EPC of a single simulated tag
    ChangeEpc {
        /// New EPC as hex (whole 16-bit words)
        epc: String,

        /// Current EPC of the simulated tag
        #[arg(long, default_value = "E20000171211012918609D70")]
        current: String,

        /// Signal strength of the simulated tag in dBm
        #[arg(long, default_value = "-42", allow_hyphen_values = true)]
        rssi: i32,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
