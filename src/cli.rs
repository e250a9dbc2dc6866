//! CLI argument parsing for the fleetway-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetway-worker", about = "Fleetway delivery dispatch worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the dispatch worker (default if no subcommand given)
    Serve {
        /// Run the condition simulator alongside the monitor
        #[arg(long)]
        simulate: bool,
        /// Override the simulator RNG seed
        #[arg(long)]
        seed: Option<u64>,
    },
}
