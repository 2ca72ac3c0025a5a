//! Diversified validation Sharpe monitor.
//!
//! At every epoch end the monitor predicts positions over the whole
//! validation partition, averages captured returns across instruments that
//! share a calendar date, and scores the resulting portfolio series. The best
//! weights are checkpointed on improvement; after `patience` epochs without
//! one the monitor asks the trainer to stop and restores them.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use momentum_checkpoint::CheckpointManager;
use momentum_core::SequenceDataset;
use momentum_models::TradingModel;
use momentum_tensor::ops::{segment_mean, turnover};
use momentum_tensor::sharpe::diversified_sharpe;
use momentum_tensor::StabilityConfig;

use crate::error::{Result, TrainingError};
use crate::time_index::TimeIndex;

/// Lifecycle of a monitor within one training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

/// What the trainer should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// No improvement, patience not yet exhausted.
    Continue,
    /// New best Sharpe; weights were checkpointed.
    Improved,
    /// Patience exhausted; the best weights have been restored.
    StopAndRestore,
}

/// Sharpe of one epoch and the decision taken on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub sharpe: f64,
    pub outcome: MonitorOutcome,
}

/// Validation inputs and returns with every cell mapped to a time index.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    inputs: Array3<f32>,
    returns: Array3<f32>,
    time_indices: Array2<usize>,
    num_time: usize,
}

impl ValidationSet {
    /// Indexes the timestamps of `data`.
    ///
    /// Inactive cells land in the reserved bucket 0. With `force_output_len > 0`
    /// only the last `force_output_len` steps of each window are scored.
    pub fn new(data: &SequenceDataset, force_output_len: usize) -> Result<Self> {
        let (inputs, returns, active, _, timestamps) = data.unpack();
        let index = TimeIndex::from_array(timestamps);
        let mut time_indices = index.map(timestamps)?;

        ndarray::Zip::from(&mut time_indices)
            .and(active)
            .for_each(|idx, &flag| {
                if flag <= 0.0 {
                    *idx = 0;
                }
            });

        let steps = time_indices.len_of(Axis(1));
        if force_output_len > 0 && force_output_len < steps {
            time_indices
                .slice_mut(ndarray::s![.., ..steps - force_output_len])
                .fill(0);
        }

        debug!(
            samples = inputs.dim().0,
            num_time = index.len(),
            "Built validation time index"
        );
        Ok(Self {
            inputs: inputs.clone(),
            returns: returns.clone(),
            time_indices,
            num_time: index.len(),
        })
    }

    pub fn inputs(&self) -> &Array3<f32> {
        &self.inputs
    }

    pub fn returns(&self) -> &Array3<f32> {
        &self.returns
    }

    pub fn time_indices(&self) -> &Array2<usize> {
        &self.time_indices
    }

    /// Number of time buckets, the reserved one included.
    pub fn num_time(&self) -> usize {
        self.num_time
    }
}

/// Portfolio series: per output channel, the mean captured return of every
/// time bucket except the reserved one, channels concatenated.
///
/// With `transaction_costs`, `turnover * cost` is charged on every cell first.
pub fn portfolio_returns(
    positions: &Array3<f32>,
    returns: &Array3<f32>,
    time_indices: &Array2<usize>,
    num_time: usize,
    transaction_costs: Option<f64>,
) -> Result<Vec<f64>> {
    if positions.dim() != returns.dim() {
        let (n, t, c) = returns.dim();
        let (pn, pt, pc) = positions.dim();
        return Err(momentum_tensor::TensorError::ShapeMismatch {
            expected: vec![n, t, c],
            got: vec![pn, pt, pc],
        }
        .into());
    }

    let mut captured = positions.mapv(f64::from) * returns.mapv(f64::from);
    if let Some(cost) = transaction_costs {
        let costs = turnover(positions.view()).mapv(|d| f64::from(d) * cost);
        captured -= &costs;
    }

    let ids: Vec<usize> = time_indices.iter().copied().collect();
    let mut series = Vec::with_capacity(num_time.saturating_sub(1) * captured.len_of(Axis(2)));
    for channel in captured.axis_iter(Axis(2)) {
        let values: Vec<f64> = channel.iter().copied().collect();
        let means = segment_mean(&values, &ids, num_time)?;
        series.extend(means.into_iter().skip(1));
    }
    Ok(series)
}

fn checkpoint_manager(dir: impl Into<PathBuf>) -> CheckpointManager {
    CheckpointManager::new(dir).with_metadata("monitor", "val_sharpe")
}

/// Tracks the best validation Sharpe of one training run.
///
/// A monitor is single-run state: give every concurrent run its own instance
/// and its own checkpoint directory.
#[derive(Debug)]
pub struct DiversifiedSharpeMonitor {
    validation: Arc<ValidationSet>,
    patience: usize,
    min_delta: f64,
    transaction_costs: Option<f64>,
    stability: StabilityConfig,
    workers: usize,
    checkpoint: CheckpointManager,
    state: MonitorState,
    best_sharpe: f64,
    patience_counter: usize,
    stopped_epoch: Option<usize>,
}

impl DiversifiedSharpeMonitor {
    pub fn new(
        validation: Arc<ValidationSet>,
        patience: usize,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            validation,
            patience,
            min_delta: 1e-4,
            transaction_costs: None,
            stability: StabilityConfig::default(),
            workers: 1,
            checkpoint: checkpoint_manager(checkpoint_dir),
            state: MonitorState::Idle,
            best_sharpe: f64::NEG_INFINITY,
            patience_counter: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
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

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Annotation written next to every checkpoint of this run.
    pub fn with_checkpoint_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.checkpoint = self.checkpoint.with_metadata(key, value);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn best_sharpe(&self) -> f64 {
        self.best_sharpe
    }

    pub fn patience_counter(&self) -> usize {
        self.patience_counter
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn checkpoint_dir(&self) -> &std::path::Path {
        self.checkpoint.dir()
    }

    pub fn on_train_begin(&mut self) {
        self.best_sharpe = f64::NEG_INFINITY;
        self.patience_counter = 0;
        self.stopped_epoch = None;
        self.checkpoint.forget();
        self.state = MonitorState::Running;
    }

    /// Portfolio Sharpe of the model's current positions.
    pub fn evaluate(&self, model: &dyn TradingModel) -> Result<f64> {
        let positions = model.predict(self.validation.inputs(), self.workers)?;
        let series = portfolio_returns(
            &positions,
            self.validation.returns(),
            self.validation.time_indices(),
            self.validation.num_time(),
            self.transaction_costs,
        )?;
        Ok(diversified_sharpe(&series, &self.stability))
    }

    /// Scores the epoch, checkpoints on improvement and restores the best
    /// weights once patience runs out.
    pub fn on_epoch_end(&mut self, epoch: usize, model: &mut dyn TradingModel) -> Result<EpochReport> {
        if self.state != MonitorState::Running {
            return Err(TrainingError::MonitorNotRunning { state: self.state });
        }

        let sharpe = self.evaluate(model)?;
        info!(epoch, val_sharpe = sharpe, "Validation Sharpe");

        if sharpe > self.best_sharpe + self.min_delta {
            self.best_sharpe = sharpe;
            self.patience_counter = 0;
            self.checkpoint.save(&*model, epoch, Some(sharpe))?;
            return Ok(EpochReport {
                sharpe,
                outcome: MonitorOutcome::Improved,
            });
        }

        self.patience_counter += 1;
        debug!(
            epoch,
            patience_counter = self.patience_counter,
            patience = self.patience,
            "No validation improvement"
        );
        if self.patience_counter >= self.patience {
            self.state = MonitorState::Stopped;
            self.stopped_epoch = Some(epoch);
            info!(epoch, best_sharpe = self.best_sharpe, "Early stopping");
            self.checkpoint.restore_saved(model)?;
            return Ok(EpochReport {
                sharpe,
                outcome: MonitorOutcome::StopAndRestore,
            });
        }
        Ok(EpochReport {
            sharpe,
            outcome: MonitorOutcome::Continue,
        })
    }

    /// Loads the best checkpointed weights into `model`.
    ///
    /// Fails when no epoch of this run improved, whatever else the checkpoint
    /// directory holds.
    pub fn restore_best(&mut self, model: &mut dyn TradingModel) -> Result<()> {
        self.checkpoint.restore_saved(model)?;
        self.state = MonitorState::Stopped;
        Ok(())
    }
}
