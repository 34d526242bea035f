//! ledger-harness - Main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ledger_harness::{
    cli::{Cli, Command, run_cat_command, run_up_command, run_validate_command},
    config::HarnessConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ledger_harness=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = HarnessConfig::from_env()?;

    match cli.command {
        Command::Up { ledger, logs } => run_up_command(&config, &ledger, logs).await,
        Command::Validate { ledger } => run_validate_command(&config, &ledger),
        Command::Cat { id, path } => run_cat_command(&id, &path).await,
    }
}
