//! Epoch metrics and training history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether lower or higher values of a metric are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    /// Loss-like metrics are minimized, everything else is maximized.
    pub fn for_metric(name: &str) -> Self {
        if name.ends_with("loss") {
            Direction::Min
        } else {
            Direction::Max
        }
    }

    /// True when `current` beats `best` by more than `min_delta`. NaN never does.
    pub fn is_improvement(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Direction::Min => current < best - min_delta,
            Direction::Max => current > best + min_delta,
        }
    }

    /// Worst possible value, used to seed a running best.
    pub fn worst(self) -> f64 {
        match self {
            Direction::Min => f64::INFINITY,
            Direction::Max => f64::NEG_INFINITY,
        }
    }

    /// Best non-NaN value of a series.
    pub fn best_of(self, values: &[f64]) -> Option<f64> {
        values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .reduce(|a, b| match self {
                Direction::Min => a.min(b),
                Direction::Max => a.max(b),
            })
    }
}

/// Values reported at the end of one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub loss: f64,
    /// Validation loss, sharpe and any other named values.
    pub values: BTreeMap<String, f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, loss: f64) -> Self {
        Self {
            epoch,
            loss,
            values: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Looks a metric up by name; `"loss"` is the training loss.
    pub fn get(&self, name: &str) -> Option<f64> {
        if name == "loss" {
            Some(self.loss)
        } else {
            self.values.get(name).copied()
        }
    }
}

/// Per-metric series over the epochs of one fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    series: BTreeMap<String, Vec<f64>>,
    epochs: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, metrics: &EpochMetrics) {
        self.series
            .entry("loss".to_string())
            .or_default()
            .push(metrics.loss);
        for (name, value) in &metrics.values {
            self.series.entry(name.clone()).or_default().push(*value);
        }
        self.epochs += 1;
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn best(&self, name: &str, direction: Direction) -> Option<f64> {
        self.get(name).and_then(|values| direction.best_of(values))
    }

    /// Best-epoch value of every metric, each in its own direction.
    pub fn best_per_metric(&self) -> BTreeMap<String, f64> {
        self.series
            .iter()
            .filter_map(|(name, values)| {
                Direction::for_metric(name)
                    .best_of(values)
                    .map(|best| (name.clone(), best))
            })
            .collect()
    }
}

/// Running sample-weighted mean of batch losses.
#[derive(Debug, Clone, Default)]
pub struct LossRecorder {
    total: f64,
    samples: usize,
    batches: usize,
}

impl LossRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f64, batch_size: usize) {
        self.total += loss * batch_size as f64;
        self.samples += batch_size;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean loss; NaN before any batch.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            f64::NAN
        } else {
            self.total / self.samples as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_for_metric() {
        assert_eq!(Direction::for_metric("loss"), Direction::Min);
        assert_eq!(Direction::for_metric("val_loss"), Direction::Min);
        assert_eq!(Direction::for_metric("sharpe"), Direction::Max);
    }

    #[test]
    fn test_improvement_requires_min_delta() {
        assert!(Direction::Max.is_improvement(1.0002, 1.0, 1e-4));
        assert!(!Direction::Max.is_improvement(1.00005, 1.0, 1e-4));
        assert!(Direction::Min.is_improvement(0.5, 0.6, 1e-4));
        assert!(!Direction::Max.is_improvement(f64::NAN, f64::NEG_INFINITY, 1e-4));
        assert!(Direction::Max.is_improvement(-5.0, Direction::Max.worst(), 1e-4));
    }

    #[test]
    fn test_history_best_per_metric() {
        let mut history = History::new();
        history.record(&EpochMetrics::new(0, 0.5).with_metric("sharpe", 0.1));
        history.record(&EpochMetrics::new(1, 0.3).with_metric("sharpe", 0.9));
        history.record(&EpochMetrics::new(2, 0.4).with_metric("sharpe", f64::NAN));
        let best = history.best_per_metric();
        assert_eq!(best["loss"], 0.3);
        assert_eq!(best["sharpe"], 0.9);
        assert_eq!(history.epochs(), 3);
        assert_eq!(history.best("loss", Direction::Max), Some(0.5));
    }

    #[test]
    fn test_loss_recorder_weights_by_batch_size() {
        let mut recorder = LossRecorder::new();
        assert!(recorder.mean().is_nan());
        recorder.record(1.0, 3);
        recorder.record(-1.0, 1);
        assert_eq!(recorder.mean(), 0.5);
        assert_eq!(recorder.batches(), 2);
        recorder.reset();
        assert_eq!(recorder.batches(), 0);
    }

    #[test]
    fn test_epoch_metrics_lookup() {
        let m = EpochMetrics::new(3, -1.2).with_metric("val_loss", -0.8);
        assert_eq!(m.get("loss"), Some(-1.2));
        assert_eq!(m.get("val_loss"), Some(-0.8));
        assert_eq!(m.get("sharpe"), None);
    }
}
