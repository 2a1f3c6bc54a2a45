//! savesync CLI - inspect and simulate buffered player save delivery

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::cadence::run_cadence;
use crate::commands::common::{load_config, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::pending::run_pending;
use crate::commands::push::run_push;
use crate::commands::simulate::{run_simulate, SimulationOptions};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("savesync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config()?;

    match cli.command {
        Commands::Simulate {
            players,
            seconds,
            drop_rate,
            latency_ms,
            seed,
            json,
        } => {
            let options = SimulationOptions {
                players,
                seconds,
                drop_rate,
                latency_ms,
                seed,
            };
            run_simulate(&options, &config, json).await?;
        }
        Commands::Pending { player, json } => {
            let db_path = resolve_db_path(cli.db_path);
            run_pending(player.as_deref(), json, &db_path)?;
        }
        Commands::Push { player } => {
            let db_path = resolve_db_path(cli.db_path);
            run_push(&player, &config, &db_path).await?;
        }
        Commands::Cadence {
            slot,
            count,
            from_secs,
        } => run_cadence(slot, usize::from(count), from_secs, &config)?,
        Commands::Config => run_config(&config, &resolve_db_path(cli.db_path)),
    }

    Ok(())
}
