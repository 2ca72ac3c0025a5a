//! Momentum CLI - search, fit and backtest Sharpe-trained momentum networks.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use momentum_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("momentum=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("Momentum CLI starting...");

    match cli.command {
        Commands::Search(cmd) => cmd.run()?,
        Commands::Fit(cmd) => cmd.run()?,
        Commands::Backtest(cmd) => cmd.run()?,
    }

    info!("Momentum CLI completed successfully");
    Ok(())
}
