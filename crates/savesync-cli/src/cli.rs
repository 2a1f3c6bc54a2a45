use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Upper bound for `cadence --count`
pub const MAX_CADENCE_WINDOWS: i64 = 1_000;

#[derive(Parser)]
#[command(name = "savesync")]
#[command(about = "Inspect and simulate buffered player save delivery")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local save store
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run simulated player sessions against an in-memory server
    Simulate {
        /// Number of concurrent players
        #[arg(short, long, default_value = "8")]
        players: usize,
        /// Simulated play time in seconds
        #[arg(short, long, default_value = "120")]
        seconds: u64,
        /// Fraction of confirmations the server drops
        #[arg(long, default_value = "0.1")]
        drop_rate: f64,
        /// Delay before the server confirms a submission
        #[arg(long, default_value = "400")]
        latency_ms: u64,
        /// Seed for cadence slots, gameplay and drops
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List save records still waiting for server confirmation
    Pending {
        /// Only show records of this player
        #[arg(long)]
        player: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deliver a player's unconfirmed records to the configured endpoint
    Push {
        /// Player whose stored records are delivered
        #[arg(long)]
        player: String,
    },
    /// Show upcoming acceptance windows for a cadence slot
    Cadence {
        /// Cadence slot
        #[arg(long)]
        slot: u32,
        /// Number of windows to show
        #[arg(
            short,
            long,
            default_value = "5",
            value_parser = clap::value_parser!(u16).range(1..=MAX_CADENCE_WINDOWS)
        )]
        count: u16,
        /// Start of the listing in seconds
        #[arg(long, default_value = "0")]
        from_secs: i64,
    },
    /// Print the resolved configuration
    Config,
}
