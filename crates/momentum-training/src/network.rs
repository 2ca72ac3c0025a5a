//! High-level entry point tying search, fitting and backtesting together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use momentum_checkpoint::ProjectLayout;
use momentum_core::{HyperParameters, ModelParams, SequenceDataset};
use momentum_models::{builder_for, ModelBuilder, TradingModel};
use momentum_tensor::StabilityConfig;

use crate::error::Result;
use crate::evaluator::{BacktestResults, PositionEvaluator, YearRange};
use crate::trainer::{StoppingStrategy, Trainer, TrainerConfig};
use crate::tuner::{DiversifiedSharpeStrategy, TrialStrategy, Tuner, ValidationLossStrategy};

/// A momentum network: one architecture, one parameter set, one search
/// project on disk.
///
/// # Examples
///
/// ```no_run
/// use momentum_core::{ModelFeatures, ModelParams};
/// use momentum_training::MomentumNetwork;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let features = ModelFeatures::from_json_file("features.json")?;
/// let params = ModelParams::from_json_file("params.json")?;
/// let network = MomentumNetwork::new("lstm_run", "hp_search", params)?;
/// let (hp, model) = network.hyperparameter_search(&features.train, &features.valid)?;
/// let sharpe = network.evaluate(&features.valid, model.as_ref())?;
/// println!("{} -> {}", hp, sharpe);
/// # Ok(())
/// # }
/// ```
pub struct MomentumNetwork {
    params: ModelParams,
    builder: Arc<dyn ModelBuilder>,
    layout: ProjectLayout,
    hp_minibatch_size: Vec<i64>,
    stability: StabilityConfig,
}

impl MomentumNetwork {
    /// Validates `params` and selects the builder for its architecture.
    pub fn new(
        project_name: impl Into<String>,
        hp_directory: impl Into<PathBuf>,
        params: ModelParams,
    ) -> Result<Self> {
        params.validate()?;
        let stability = StabilityConfig::default();
        let builder = builder_for(&params, stability);
        let layout = ProjectLayout::new(hp_directory, project_name);

        info!(project = layout.project_name(), model = builder.name(), "Momentum network params:");
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(&params) {
            for (key, value) in fields {
                info!("{} = {}", key, value);
            }
        }

        Ok(Self {
            hp_minibatch_size: builder.batch_sizes(),
            params,
            builder,
            layout,
            stability,
        })
    }

    /// Replaces the model builder; its batch sizes become the searched ones.
    pub fn with_builder(mut self, builder: Arc<dyn ModelBuilder>) -> Self {
        self.hp_minibatch_size = builder.batch_sizes();
        self.builder = builder;
        self
    }

    pub fn with_hp_minibatch_size(mut self, sizes: Vec<i64>) -> Self {
        self.hp_minibatch_size = sizes;
        self
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn builder(&self) -> &dyn ModelBuilder {
        self.builder.as_ref()
    }

    fn trainer(&self) -> Trainer {
        Trainer::new(TrainerConfig::from(&self.params).with_stability(self.stability))
    }

    /// Random search over the builder's space; returns the best sample and
    /// its trained model.
    pub fn hyperparameter_search(
        &self,
        train: &SequenceDataset,
        valid: &SequenceDataset,
    ) -> Result<(HyperParameters, Box<dyn TradingModel>)> {
        let strategy: Box<dyn TrialStrategy> = match StoppingStrategy::for_params(&self.params) {
            StoppingStrategy::DiversifiedSharpe => Box::new(DiversifiedSharpeStrategy::new(
                self.trainer(),
                self.params.executions_per_trial,
            )),
            StoppingStrategy::ValidationLoss => Box::new(ValidationLossStrategy::new(self.trainer())),
        };
        let mut tuner = Tuner::new(
            Arc::clone(&self.builder),
            strategy,
            self.layout.clone(),
            self.params.random_search_iterations,
            &self.hp_minibatch_size,
            self.params.seed,
        )?;
        tuner.search(train, valid)?;
        Ok((tuner.get_best_hyperparameters()?, tuner.get_best_model()?))
    }

    /// Builds an untrained model for a sample.
    pub fn load_model(&self, hyperparameters: &HyperParameters) -> Result<Box<dyn TradingModel>> {
        Ok(self.builder.build(hyperparameters)?)
    }

    /// Trains a fresh model on a fixed sample.
    ///
    /// Under the diversified strategy `temp_folder` receives the best weights,
    /// which are loaded back before returning.
    pub fn fit(
        &self,
        train: &SequenceDataset,
        valid: &SequenceDataset,
        hyperparameters: &HyperParameters,
        temp_folder: &Path,
    ) -> Result<Box<dyn TradingModel>> {
        let (model, report) = self.trainer().fit(
            self.builder.as_ref(),
            hyperparameters,
            train,
            valid,
            StoppingStrategy::for_params(&self.params),
            temp_folder,
        )?;
        info!(
            epochs = report.epochs_run,
            stopped_early = report.stopped_early,
            "Fit finished"
        );
        Ok(model)
    }

    /// Backtest Sharpe over every step under the diversified strategy,
    /// weighted loss otherwise.
    pub fn evaluate(&self, data: &SequenceDataset, model: &dyn TradingModel) -> Result<f64> {
        if self.params.evaluate_diversified_val_sharpe {
            let results = self.get_positions(data, model, false, YearRange::default())?;
            Ok(results.sharpe)
        } else {
            Ok(model.evaluate(data, self.params.multiprocessing_workers)?)
        }
    }

    pub fn get_positions(
        &self,
        data: &SequenceDataset,
        model: &dyn TradingModel,
        sliding_window: bool,
        years: YearRange,
    ) -> Result<BacktestResults> {
        PositionEvaluator::new(self.params.multiprocessing_workers)
            .with_annualization(self.stability.annualization)
            .get_positions(data, model, sliding_window, years)
    }
}
