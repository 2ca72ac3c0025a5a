//! Epoch loop and the two early-stopping strategies.

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use momentum_core::{HyperParameters, ModelParams, SequenceDataset};
use momentum_models::{ModelBuilder, TradingModel, TrainBatch};
use momentum_tensor::StabilityConfig;

use crate::error::{Result, TrainingError};
use crate::hooks::{EarlyStoppingHook, HookAction, HookError, HookList, LoggingHook, TerminateOnNaN};
use crate::metrics::{EpochMetrics, History, LossRecorder};
use crate::monitor::{DiversifiedSharpeMonitor, MonitorOutcome, ValidationSet};

/// How a fit decides when to stop and which weights to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingStrategy {
    /// Portfolio Sharpe on the validation partition, best checkpoint reloaded.
    DiversifiedSharpe,
    /// Weighted validation loss, best epoch restored from memory.
    ValidationLoss,
}

impl StoppingStrategy {
    pub fn for_params(params: &ModelParams) -> Self {
        if params.evaluate_diversified_val_sharpe {
            StoppingStrategy::DiversifiedSharpe
        } else {
            StoppingStrategy::ValidationLoss
        }
    }
}

/// Settings shared by every fit of one network.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub num_epochs: usize,
    pub early_stopping_patience: usize,
    pub min_delta: f64,
    pub workers: usize,
    pub transaction_costs: Option<f64>,
    pub force_output_sharpe_length: usize,
    pub stability: StabilityConfig,
    /// Seeds minibatch shuffling; entropy when absent.
    pub seed: Option<u64>,
    pub log_every_n_epochs: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self::from(&ModelParams::default())
    }
}

impl From<&ModelParams> for TrainerConfig {
    fn from(params: &ModelParams) -> Self {
        Self {
            num_epochs: params.num_epochs,
            early_stopping_patience: params.early_stopping_patience,
            min_delta: params.min_delta,
            workers: params.multiprocessing_workers,
            transaction_costs: params.transaction_costs,
            force_output_sharpe_length: params.force_output_sharpe_length,
            stability: StabilityConfig::default(),
            seed: params.seed,
            log_every_n_epochs: 1,
        }
    }
}

impl TrainerConfig {
    pub fn with_num_epochs(mut self, epochs: usize) -> Self {
        self.num_epochs = epochs;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.early_stopping_patience = patience;
        self
    }

    pub fn with_transaction_costs(mut self, rate: Option<f64>) -> Self {
        self.transaction_costs = rate;
        self
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_log_every_n_epochs(mut self, every: usize) -> Self {
        self.log_every_n_epochs = every;
        self
    }
}

/// Outcome of one fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub history: History,
    pub epochs_run: usize,
    pub stopped_early: bool,
}

/// Drives a [`TradingModel`] through epochs of shuffled minibatches.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Indexes `valid` once so several monitors can share it.
    pub fn validation_set(&self, valid: &SequenceDataset) -> Result<Arc<ValidationSet>> {
        Ok(Arc::new(ValidationSet::new(
            valid,
            self.config.force_output_sharpe_length,
        )?))
    }

    /// A monitor configured from this trainer's settings.
    pub fn monitor(
        &self,
        validation: Arc<ValidationSet>,
        checkpoint_dir: impl Into<std::path::PathBuf>,
    ) -> DiversifiedSharpeMonitor {
        DiversifiedSharpeMonitor::new(validation, self.config.early_stopping_patience, checkpoint_dir)
            .with_min_delta(self.config.min_delta)
            .with_transaction_costs(self.config.transaction_costs)
            .with_stability(self.config.stability)
            .with_workers(self.config.workers)
    }

    /// Runs the epoch loop.
    ///
    /// `valid` adds a `val_loss` metric; `monitor` adds `sharpe` and may stop
    /// the run. Hooks see every batch loss and every epoch.
    pub fn run(
        &self,
        model: &mut dyn TradingModel,
        train: &SequenceDataset,
        batch_size: usize,
        valid: Option<&SequenceDataset>,
        hooks: &mut HookList,
        mut monitor: Option<&mut DiversifiedSharpeMonitor>,
    ) -> Result<FitReport> {
        if batch_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if train.is_empty() {
            return Err(TrainingError::InvalidConfig(
                "training partition is empty".to_string(),
            ));
        }

        info!(
            model = model.name(),
            epochs = self.config.num_epochs,
            batch_size,
            samples = train.num_samples(),
            "Starting training"
        );

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..train.num_samples()).collect();
        let mut recorder = LossRecorder::new();
        let mut report = FitReport::default();

        hooks.on_train_begin()?;
        if let Some(monitor) = monitor.as_deref_mut() {
            monitor.on_train_begin();
        }

        for epoch in 0..self.config.num_epochs {
            order.shuffle(&mut rng);
            recorder.reset();
            let mut stop = false;

            for (batch_idx, chunk) in order.chunks(batch_size).enumerate() {
                let batch = TrainBatch::from_dataset(train, chunk);
                let loss = model.train_on_batch(&batch)?;
                match hooks.on_batch_end(epoch, batch_idx, loss) {
                    Ok(HookAction::Continue) => {}
                    Ok(HookAction::Stop) => stop = true,
                    Err(HookError::NonFiniteLoss { batch, loss }) => {
                        return Err(TrainingError::NonFiniteLoss { epoch, batch, loss });
                    }
                    Err(e) => return Err(e.into()),
                }
                recorder.record(loss, batch.len());
                if stop {
                    break;
                }
            }

            let mut metrics = EpochMetrics::new(epoch, recorder.mean());
            if let Some(valid) = valid {
                let val_loss = model.evaluate(valid, self.config.workers)?;
                metrics = metrics.with_metric("val_loss", val_loss);
            }
            if let Some(monitor) = monitor.as_deref_mut() {
                let epoch_report = monitor.on_epoch_end(epoch, model)?;
                metrics = metrics.with_metric("sharpe", epoch_report.sharpe);
                if epoch_report.outcome == MonitorOutcome::StopAndRestore {
                    stop = true;
                }
            }
            debug!(epoch, batches = recorder.batches(), loss = metrics.loss, "Epoch finished");

            report.history.record(&metrics);
            report.epochs_run = epoch + 1;
            if hooks.on_epoch_end(&metrics, model)? == HookAction::Stop {
                stop = true;
            }
            if stop {
                info!(epoch, "Training stopped early");
                report.stopped_early = true;
                break;
            }
        }

        hooks.on_train_end(model)?;
        Ok(report)
    }

    /// Trains under the diversified Sharpe monitor and reloads its best
    /// checkpoint at the end.
    pub fn fit_with_monitor(
        &self,
        model: &mut dyn TradingModel,
        train: &SequenceDataset,
        batch_size: usize,
        monitor: &mut DiversifiedSharpeMonitor,
    ) -> Result<FitReport> {
        let mut hooks = HookList::new();
        hooks.add(TerminateOnNaN);
        hooks.add(LoggingHook::new(self.config.log_every_n_epochs));
        let report = self.run(model, train, batch_size, None, &mut hooks, Some(&mut *monitor))?;
        monitor.restore_best(model)?;
        Ok(report)
    }

    /// Trains with early stopping on `val_loss`, restoring the best epoch.
    pub fn fit_with_validation_loss(
        &self,
        model: &mut dyn TradingModel,
        train: &SequenceDataset,
        valid: &SequenceDataset,
        batch_size: usize,
    ) -> Result<FitReport> {
        let mut hooks = HookList::new();
        hooks.add(TerminateOnNaN);
        hooks.add(
            EarlyStoppingHook::new(
                "val_loss",
                self.config.early_stopping_patience,
                self.config.min_delta,
            )
            .with_restore_best_weights(true),
        );
        hooks.add(LoggingHook::new(self.config.log_every_n_epochs));
        self.run(model, train, batch_size, Some(valid), &mut hooks, None)
    }

    /// Builds a fresh model from `hp` and fits it with `strategy`.
    ///
    /// `checkpoint_dir` holds the best weights of a diversified fit.
    pub fn fit(
        &self,
        builder: &dyn ModelBuilder,
        hp: &HyperParameters,
        train: &SequenceDataset,
        valid: &SequenceDataset,
        strategy: StoppingStrategy,
        checkpoint_dir: &Path,
    ) -> Result<(Box<dyn TradingModel>, FitReport)> {
        let batch_size = hp.batch_size()?;
        let mut model = builder.build(hp)?;
        let report = match strategy {
            StoppingStrategy::DiversifiedSharpe => {
                let mut monitor = self.monitor(self.validation_set(valid)?, checkpoint_dir);
                self.fit_with_monitor(model.as_mut(), train, batch_size, &mut monitor)?
            }
            StoppingStrategy::ValidationLoss => {
                self.fit_with_validation_loss(model.as_mut(), train, valid, batch_size)?
            }
        };
        Ok((model, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{peeking_dataset, ScriptedModel};
    use tempfile::tempdir;

    const RETURNS: [f64; 4] = [0.01, -0.01, 0.02, -0.02];

    fn trainer(epochs: usize, patience: usize) -> Trainer {
        Trainer::new(
            TrainerConfig::default()
                .with_num_epochs(epochs)
                .with_patience(patience)
                .with_seed(7),
        )
    }

    #[test]
    fn test_strategy_for_params() {
        let params = ModelParams::default();
        assert_eq!(StoppingStrategy::for_params(&params), StoppingStrategy::ValidationLoss);
        let params = params.with_diversified_val_sharpe(true);
        assert_eq!(StoppingStrategy::for_params(&params), StoppingStrategy::DiversifiedSharpe);
    }

    #[test]
    fn test_runs_every_epoch_without_stop_signal() {
        let data = peeking_dataset(&[RETURNS, RETURNS, RETURNS]);
        let mut model = ScriptedModel::new(vec![]);
        let mut hooks = HookList::new();
        let report = trainer(3, 1)
            .run(&mut model, &data, 2, None, &mut hooks, None)
            .unwrap();
        assert_eq!(report.epochs_run, 3);
        assert!(!report.stopped_early);
        assert_eq!(report.history.epochs(), 3);
        // 3 samples in batches of 2
        assert_eq!(model.steps(), 6);
    }

    #[test]
    fn test_validation_loss_restores_best_epoch() {
        let data = peeking_dataset(&[RETURNS, RETURNS]);
        let mut model = ScriptedModel::new(vec![]).with_schedule(vec![3.0, 2.0, 1.0, 1.5, 2.0, 2.5]);
        let report = trainer(10, 2)
            .fit_with_validation_loss(&mut model, &data, &data, 8)
            .unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.epochs_run, 5);
        assert_eq!(report.history.get("val_loss").unwrap(), &[3.0, 2.0, 1.0, 1.5, 2.0]);
        assert_eq!(model.version(), 1.0);
    }

    #[test]
    fn test_non_finite_loss_aborts_run() {
        let data = peeking_dataset(&[RETURNS]);
        let mut model = ScriptedModel::new(vec![-0.5, f64::NAN]);
        let err = trainer(5, 2)
            .fit_with_validation_loss(&mut model, &data, &data, 8)
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::NonFiniteLoss {
                epoch: 1,
                batch: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_diversified_fit_reloads_best_checkpoint() {
        let data = peeking_dataset(&[RETURNS, RETURNS]);
        let dir = tempdir().unwrap();
        let trainer = trainer(20, 3);
        let mut monitor = trainer.monitor(trainer.validation_set(&data).unwrap(), dir.path());
        let mut model = ScriptedModel::new(vec![]).with_schedule(vec![2.0, 1.0, 0.0, 0.5, 1.0, 1.5, 2.0]);

        let report = trainer
            .fit_with_monitor(&mut model, &data, 8, &mut monitor)
            .unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.epochs_run, 6);
        assert_eq!(report.history.get("sharpe").map(<[f64]>::len), Some(6));
        assert!(report.history.get("val_loss").is_none());
        assert_eq!(model.version(), 0.0);
    }

    #[test]
    fn test_transaction_costs_lower_the_monitored_sharpe() {
        let data = peeking_dataset(&[RETURNS, RETURNS]);
        let dir = tempdir().unwrap();
        let monitored_sharpe = |costs: Option<f64>, name: &str| {
            let trainer = Trainer::new(
                TrainerConfig::default()
                    .with_num_epochs(2)
                    .with_patience(5)
                    .with_seed(7)
                    .with_transaction_costs(costs),
            );
            let mut monitor = trainer.monitor(trainer.validation_set(&data).unwrap(), dir.path().join(name));
            let mut model = ScriptedModel::new(vec![]);
            let report = trainer
                .fit_with_monitor(&mut model, &data, 8, &mut monitor)
                .unwrap();
            report.history.get("sharpe").unwrap()[0]
        };

        let free = monitored_sharpe(None, "free");
        let charged = monitored_sharpe(Some(0.01), "charged");
        // positions equal returns: net captured [1, -1, 1, 0] * 1e-4 per date
        let m = 0.25e-4;
        let var = 0.75e-8 - m * m;
        let expected = m / (var + 1e-9f64).sqrt() * 252f64.sqrt();
        assert!((charged - expected).abs() / expected < 1e-3);
        assert!(charged < free);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let data = peeking_dataset(&[RETURNS]);
        let mut model = ScriptedModel::new(vec![]);
        let mut hooks = HookList::new();
        assert!(matches!(
            trainer(1, 1).run(&mut model, &data, 0, None, &mut hooks, None),
            Err(TrainingError::InvalidConfig(_))
        ));
    }
}
