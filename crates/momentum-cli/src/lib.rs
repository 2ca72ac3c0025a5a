//! Momentum CLI Library
//!
//! Command-line access to the momentum training engine:
//!
//! - **Search**: random hyperparameter search, best sample and weights saved
//! - **Fit**: train one fixed sample and save its weights
//! - **Backtest**: discretized positions, portfolio Sharpe and a CSV table
//!
//! # Example
//!
//! ```bash
//! momentum search --params params.json --data features.json --hp-dir hp --project lstm
//! momentum fit --params params.json --data features.json --hyperparameters best_hp.json --weights model.safetensors
//! momentum backtest --params params.json --data features.json --hyperparameters best_hp.json \
//!     --weights model.safetensors --output results.csv --sliding-window
//! ```

pub mod commands;

use clap::{Parser, Subcommand};

pub use commands::{BacktestCommand, FitCommand, Partition, SearchCommand};

/// Momentum - Sharpe-ratio trained deep momentum networks
#[derive(Parser, Debug)]
#[command(name = "momentum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a random hyperparameter search
    Search(SearchCommand),

    /// Train a model for a fixed hyperparameter sample
    Fit(FitCommand),

    /// Backtest a trained model
    Backtest(BacktestCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backtest() {
        let cli = Cli::try_parse_from([
            "momentum",
            "backtest",
            "--params",
            "p.json",
            "--data",
            "d.json",
            "--hyperparameters",
            "hp.json",
            "--weights",
            "w.safetensors",
            "--output",
            "out.csv",
            "--sliding-window",
            "--years-geq",
            "2015",
        ])
        .unwrap();
        match cli.command {
            Commands::Backtest(cmd) => {
                assert!(cmd.sliding_window);
                assert_eq!(cmd.years_geq, Some(2015));
                assert_eq!(cmd.years_lt, None);
                assert_eq!(cmd.partition, Partition::Test);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_search_requires_data() {
        assert!(Cli::try_parse_from(["momentum", "search", "--params", "p.json"]).is_err());
    }
}
