//! Training hooks for customizing the epoch loop.
//!
//! Hooks observe batch losses and epoch metrics and may stop training early.
//! Unlike the diversified validation monitor, which the trainer advances
//! explicitly, hooks are generic observers kept in a [`HookList`].

use thiserror::Error;
use tracing::{debug, info, warn};

use momentum_models::{ModelError, TradingModel, WeightSnapshot};

use crate::metrics::{Direction, EpochMetrics};

/// Errors that can occur during hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// A batch loss was NaN or infinite.
    #[error("Non-finite loss {loss} at batch {batch}")]
    NonFiniteLoss { batch: usize, loss: f64 },

    /// Snapshotting or restoring weights failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// A custom hook error.
    #[error("Hook error: {0}")]
    Custom(String),
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Action to take after a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Continue training normally.
    Continue,
    /// Stop training after this epoch.
    Stop,
}

/// Trait for training hooks.
///
/// # Examples
///
/// ```
/// use momentum_training::hooks::{Hook, HookAction, HookResult};
///
/// struct CountBatches(usize);
///
/// impl Hook for CountBatches {
///     fn name(&self) -> &str {
///         "count_batches"
///     }
///
///     fn on_batch_end(&mut self, _epoch: usize, _batch: usize, _loss: f64) -> HookResult<HookAction> {
///         self.0 += 1;
///         Ok(HookAction::Continue)
///     }
/// }
/// ```
pub trait Hook: Send {
    /// Returns the name of this hook for logging purposes.
    fn name(&self) -> &str;

    /// Called once before the first epoch.
    fn on_train_begin(&mut self) -> HookResult<()> {
        Ok(())
    }

    /// Called after every optimizer step with the batch loss.
    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, _loss: f64) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    /// Called after each epoch with its metrics.
    fn on_epoch_end(
        &mut self,
        _metrics: &EpochMetrics,
        _model: &mut dyn TradingModel,
    ) -> HookResult<HookAction> {
        Ok(HookAction::Continue)
    }

    /// Called once after the last epoch, including after an early stop.
    fn on_train_end(&mut self, _model: &mut dyn TradingModel) -> HookResult<()> {
        Ok(())
    }
}

/// Logs epoch metrics at regular intervals.
#[derive(Debug)]
pub struct LoggingHook {
    every_n_epochs: usize,
}

impl LoggingHook {
    pub fn new(every_n_epochs: usize) -> Self {
        Self {
            every_n_epochs: every_n_epochs.max(1),
        }
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging_hook"
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        _model: &mut dyn TradingModel,
    ) -> HookResult<HookAction> {
        if metrics.epoch % self.every_n_epochs == 0 {
            let mut msg = format!("Epoch {}: loss = {:.6}", metrics.epoch, metrics.loss);
            for (name, value) in &metrics.values {
                msg.push_str(&format!(", {} = {:.6}", name, value));
            }
            info!("{}", msg);
        }
        Ok(HookAction::Continue)
    }
}

/// Aborts the run on the first NaN or infinite batch loss.
#[derive(Debug, Default)]
pub struct TerminateOnNaN;

impl Hook for TerminateOnNaN {
    fn name(&self) -> &str {
        "terminate_on_nan"
    }

    fn on_batch_end(&mut self, epoch: usize, batch: usize, loss: f64) -> HookResult<HookAction> {
        if loss.is_finite() {
            return Ok(HookAction::Continue);
        }
        warn!(epoch, batch, loss, "Invalid loss, terminating training");
        Err(HookError::NonFiniteLoss { batch, loss })
    }
}

/// Stops when a monitored metric stops improving and optionally rolls the
/// model back to its best epoch.
pub struct EarlyStoppingHook {
    metric_name: String,
    patience: usize,
    min_delta: f64,
    direction: Direction,
    restore_best_weights: bool,
    best_value: f64,
    best_epoch: Option<usize>,
    best_weights: Option<WeightSnapshot>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStoppingHook {
    /// Creates a hook watching `metric_name`; its direction follows the name.
    pub fn new(metric_name: impl Into<String>, patience: usize, min_delta: f64) -> Self {
        let metric_name = metric_name.into();
        let direction = Direction::for_metric(&metric_name);
        Self {
            metric_name,
            patience,
            min_delta: min_delta.abs(),
            direction,
            restore_best_weights: false,
            best_value: direction.worst(),
            best_epoch: None,
            best_weights: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self.best_value = direction.worst();
        self
    }

    pub fn with_restore_best_weights(mut self, restore: bool) -> Self {
        self.restore_best_weights = restore;
        self
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best_value)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl Hook for EarlyStoppingHook {
    fn name(&self) -> &str {
        "early_stopping_hook"
    }

    fn on_train_begin(&mut self) -> HookResult<()> {
        self.best_value = self.direction.worst();
        self.best_epoch = None;
        self.best_weights = None;
        self.wait = 0;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        model: &mut dyn TradingModel,
    ) -> HookResult<HookAction> {
        let Some(current) = metrics.get(&self.metric_name) else {
            warn!(
                "EarlyStoppingHook: metric '{}' not found in metrics",
                self.metric_name
            );
            return Ok(HookAction::Continue);
        };

        if self
            .direction
            .is_improvement(current, self.best_value, self.min_delta)
        {
            debug!(
                "EarlyStoppingHook: {} improved from {} to {} at epoch {}",
                self.metric_name, self.best_value, current, metrics.epoch
            );
            self.best_value = current;
            self.best_epoch = Some(metrics.epoch);
            self.wait = 0;
            if self.restore_best_weights {
                self.best_weights = Some(model.snapshot()?);
            }
            return Ok(HookAction::Continue);
        }

        self.wait += 1;
        debug!(
            "EarlyStoppingHook: no improvement for {} epochs (patience: {})",
            self.wait, self.patience
        );
        if self.wait >= self.patience {
            info!(
                "EarlyStoppingHook: stopping at epoch {}, best {} = {} at epoch {:?}",
                metrics.epoch, self.metric_name, self.best_value, self.best_epoch
            );
            self.stopped_epoch = Some(metrics.epoch);
            return Ok(HookAction::Stop);
        }
        Ok(HookAction::Continue)
    }

    fn on_train_end(&mut self, model: &mut dyn TradingModel) -> HookResult<()> {
        if let (true, Some(weights)) = (self.restore_best_weights, self.best_weights.as_ref()) {
            info!(
                "EarlyStoppingHook: restoring weights from epoch {:?}",
                self.best_epoch
            );
            model.restore_snapshot(weights)?;
        }
        Ok(())
    }
}

/// An ordered collection of hooks.
#[derive(Default)]
pub struct HookList {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.push(Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn on_train_begin(&mut self) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.on_train_begin()?;
        }
        Ok(())
    }

    pub fn on_batch_end(&mut self, epoch: usize, batch: usize, loss: f64) -> HookResult<HookAction> {
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.on_batch_end(epoch, batch, loss)? == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }

    /// Runs every hook; stops if any hook asks to.
    pub fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        model: &mut dyn TradingModel,
    ) -> HookResult<HookAction> {
        let mut action = HookAction::Continue;
        for hook in &mut self.hooks {
            if hook.on_epoch_end(metrics, model)? == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        Ok(action)
    }

    pub fn on_train_end(&mut self, model: &mut dyn TradingModel) -> HookResult<()> {
        for hook in &mut self.hooks {
            hook.on_train_end(model)?;
        }
        Ok(())
    }
}
