//! Command implementations for the CLI.

mod config;
mod simulate;

pub use config::cmd_config;
pub use simulate::{cmd_simulate_change_epc, cmd_simulate_inventory};
