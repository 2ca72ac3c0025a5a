//! Backtest Command Implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use momentum_checkpoint::Persist;
use momentum_training::{MomentumNetwork, YearRange};
use tracing::info;

use super::{load_features, load_params, read_hyperparameters, Partition};

/// Backtest a trained model
///
/// Positions are discretized to long, flat or short; the per-cell table is
/// written as CSV and the portfolio Sharpe ratio is logged.
///
/// # Example
///
/// ```bash
/// momentum backtest \
///     --params params.json \
///     --data features.json \
///     --hyperparameters best_hp.json \
///     --weights model.safetensors \
///     --output results.csv \
///     --sliding-window --years-geq 2016 --years-lt 2021
/// ```
#[derive(Args, Debug, Clone)]
pub struct BacktestCommand {
    /// Model parameters (JSON)
    #[arg(long, env = "MOMENTUM_PARAMS")]
    pub params: PathBuf,

    /// Dataset with train, valid and optional test partitions (JSON)
    #[arg(long, env = "MOMENTUM_DATA")]
    pub data: PathBuf,

    /// Hyperparameter sample the weights were trained with (JSON)
    #[arg(long)]
    pub hyperparameters: PathBuf,

    /// Trained weights
    #[arg(long)]
    pub weights: PathBuf,

    /// Partition to backtest
    #[arg(long, value_enum, default_value = "test")]
    pub partition: Partition,

    /// Use only the last step of each window
    #[arg(long)]
    pub sliding_window: bool,

    /// First calendar year kept
    #[arg(long)]
    pub years_geq: Option<i32>,

    /// First calendar year dropped
    #[arg(long)]
    pub years_lt: Option<i32>,

    /// Where to write the results table (CSV)
    #[arg(long, default_value = "backtest.csv")]
    pub output: PathBuf,
}

impl BacktestCommand {
    pub fn years(&self) -> YearRange {
        let all = YearRange::default();
        YearRange::new(
            self.years_geq.unwrap_or(all.years_geq),
            self.years_lt.unwrap_or(all.years_lt),
        )
    }

    pub fn run(&self) -> Result<()> {
        let params = load_params(&self.params)?;
        let features = load_features(&self.data)?;
        let data = self.partition.select(&features)?;
        let hp = read_hyperparameters(&self.hyperparameters)?;
        let network = MomentumNetwork::new("backtest", std::env::temp_dir(), params)?;

        let mut model = network.load_model(&hp)?;
        model
            .load_weights(&self.weights)
            .with_context(|| format!("Failed to load weights from {}", self.weights.display()))?;

        let results = network.get_positions(data, model.as_ref(), self.sliding_window, self.years())?;
        results.to_csv(&self.output)?;
        info!(
            partition = ?self.partition,
            rows = results.rows.len(),
            sharpe = results.sharpe,
            "Backtest finished"
        );
        Ok(())
    }
}
