//! CLI Command Implementations
//!
//! - [`search`]: random hyperparameter search
//! - [`fit`]: training of one fixed sample
//! - [`backtest`]: positions and portfolio Sharpe of a trained model

mod backtest;
mod fit;
mod search;

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use momentum_core::{HyperParameters, ModelFeatures, ModelParams, SequenceDataset};

pub use backtest::BacktestCommand;
pub use fit::FitCommand;
pub use search::SearchCommand;

/// Dataset partition selected on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Valid,
    Test,
}

impl Partition {
    pub fn select<'a>(&self, features: &'a ModelFeatures) -> Result<&'a SequenceDataset> {
        match self {
            Partition::Train => Ok(&features.train),
            Partition::Valid => Ok(&features.valid),
            Partition::Test => features
                .test
                .as_ref()
                .context("dataset file has no test partition"),
        }
    }
}

pub(crate) fn load_params(path: &Path) -> Result<ModelParams> {
    ModelParams::from_json_file(path)
        .with_context(|| format!("Failed to load params from {}", path.display()))
}

pub(crate) fn load_features(path: &Path) -> Result<ModelFeatures> {
    ModelFeatures::from_json_file(path)
        .with_context(|| format!("Failed to load dataset from {}", path.display()))
}

pub(crate) fn read_hyperparameters(path: &Path) -> Result<HyperParameters> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hyperparameters from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse hyperparameters in {}", path.display()))
}

pub(crate) fn write_hyperparameters(path: &Path, hp: &HyperParameters) -> Result<()> {
    let json = serde_json::to_string_pretty(hp)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write hyperparameters to {}", path.display()))
}
