//! Fit Command Implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use momentum_checkpoint::Persist;
use momentum_training::MomentumNetwork;
use tracing::info;

use super::{load_features, load_params, read_hyperparameters};

/// Train a model for a fixed hyperparameter sample
///
/// # Example
///
/// ```bash
/// momentum fit \
///     --params params.json \
///     --data features.json \
///     --hyperparameters best_hp.json \
///     --weights model.safetensors
/// ```
#[derive(Args, Debug, Clone)]
pub struct FitCommand {
    /// Model parameters (JSON)
    #[arg(long, env = "MOMENTUM_PARAMS")]
    pub params: PathBuf,

    /// Dataset with train, valid and optional test partitions (JSON)
    #[arg(long, env = "MOMENTUM_DATA")]
    pub data: PathBuf,

    /// Hyperparameter sample, including batch_size (JSON)
    #[arg(long)]
    pub hyperparameters: PathBuf,

    /// Scratch directory for the best validation checkpoint
    #[arg(long, default_value = "tmp/checkpoint")]
    pub temp_folder: PathBuf,

    /// Where to write the trained weights
    #[arg(long)]
    pub weights: PathBuf,
}

impl FitCommand {
    pub fn run(&self) -> Result<()> {
        let params = load_params(&self.params)?;
        let features = load_features(&self.data)?;
        let hp = read_hyperparameters(&self.hyperparameters)?;
        let network = MomentumNetwork::new("fit", &self.temp_folder, params)?;

        let model = network
            .fit(&features.train, &features.valid, &hp, &self.temp_folder)
            .context("Training failed")?;
        let valid_score = network.evaluate(&features.valid, model.as_ref())?;
        info!(valid_score, "Validation score");

        if let Some(parent) = self.weights.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        model
            .save_weights(&self.weights)
            .with_context(|| format!("Failed to save weights to {}", self.weights.display()))?;
        info!(path = %self.weights.display(), "Saved weights");
        Ok(())
    }
}
