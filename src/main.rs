// SPDX-License-Identifier: MIT
//! tallyd entry point.
//!
//! Provides a command-line interface for running the leaderboard service,
//! handling configuration loading, and initializing the logging subsystem.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tallyd::{config::Config, errors::Result, start_server};

/// tallyd - a multi-tenant leaderboard service.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TALLYD_CONFIG",
        default_value = "/etc/tallyd/config.yml"
    )]
    config: PathBuf,

    /// Log level.
    #[arg(long, value_name = "LEVEL", default_value = "")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let log_level = if cli.log_level.is_empty() {
        config.log.level.clone()
    } else {
        cli.log_level.clone()
    };
    setup_logging(&log_level)?;

    match cli.command {
        Commands::Start => start_server(config).await?,
    }
    Ok(())
}

/// Configures the logging subsystem based on the specified log level.
fn setup_logging(level: &str) -> Result<()> {
    let filter: EnvFilter = format!("tallyd={level}")
        .parse()
        .map_err(|e| tallyd::errors::Error::Config(format!("invalid log level: {e}")))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
