//! Search Command Implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use momentum_checkpoint::Persist;
use momentum_training::MomentumNetwork;
use tracing::info;

use super::{load_features, load_params, write_hyperparameters};

/// Run a random hyperparameter search
///
/// Trials are recorded under `<hp-dir>/<project>/`. The best sample and,
/// optionally, its weights are written once the search finishes.
///
/// # Example
///
/// ```bash
/// momentum search \
///     --params params.json \
///     --data features.json \
///     --hp-dir hp_search \
///     --project lstm_2020 \
///     --best-hyperparameters best_hp.json
/// ```
#[derive(Args, Debug, Clone)]
pub struct SearchCommand {
    /// Model parameters (JSON)
    #[arg(long, env = "MOMENTUM_PARAMS")]
    pub params: PathBuf,

    /// Dataset with train, valid and optional test partitions (JSON)
    #[arg(long, env = "MOMENTUM_DATA")]
    pub data: PathBuf,

    /// Root directory of search projects
    #[arg(long, env = "MOMENTUM_HP_DIR", default_value = "hp_search")]
    pub hp_dir: PathBuf,

    /// Project name within the search directory
    #[arg(long, default_value = "momentum")]
    pub project: String,

    /// Where to write the best hyperparameters (JSON)
    #[arg(long, default_value = "best_hyperparameters.json")]
    pub best_hyperparameters: PathBuf,

    /// Where to write the best model's weights
    #[arg(long)]
    pub weights: Option<PathBuf>,
}

impl SearchCommand {
    pub fn run(&self) -> Result<()> {
        let params = load_params(&self.params)?;
        let features = load_features(&self.data)?;
        let network = MomentumNetwork::new(&self.project, &self.hp_dir, params)?;

        let (hp, model) = network
            .hyperparameter_search(&features.train, &features.valid)
            .context("Hyperparameter search failed")?;
        info!(hyperparameters = %hp, "Best hyperparameters");
        write_hyperparameters(&self.best_hyperparameters, &hp)?;

        let valid_score = network.evaluate(&features.valid, model.as_ref())?;
        info!(valid_score, "Validation score of best model");
        if let Some(test) = &features.test {
            let test_score = network.evaluate(test, model.as_ref())?;
            info!(test_score, "Test score of best model");
        }

        if let Some(path) = &self.weights {
            model
                .save_weights(path)
                .with_context(|| format!("Failed to save weights to {}", path.display()))?;
            info!(path = %path.display(), "Saved best weights");
        }
        Ok(())
    }
}
