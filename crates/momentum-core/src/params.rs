//! Fixed run configuration.
//!
//! [`ModelParams`] carries every option that stays constant across a search:
//! window length, tensor widths, epoch and patience budgets, the stopping
//! strategy switch and the transaction cost rate. It is usually loaded from a
//! JSON file; any missing field falls back to its default.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MomentumError, Result};

/// Network family used to build trial models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Architecture {
    /// Single recurrent layer with a time-distributed tanh head.
    #[default]
    Lstm,
    /// Causal self-attention encoder with a sigmoid head.
    Transformer,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Lstm => f.write_str("LSTM"),
            Architecture::Transformer => f.write_str("TRANSFORMER"),
        }
    }
}

impl FromStr for Architecture {
    type Err = MomentumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LSTM" => Ok(Architecture::Lstm),
            "TRANSFORMER" => Ok(Architecture::Transformer),
            other => Err(MomentumError::config(format!(
                "unknown architecture {:?}",
                other
            ))),
        }
    }
}

/// Configuration shared by every trial of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Network family.
    pub architecture: Architecture,
    /// Length of each input window.
    pub total_time_steps: usize,
    /// Number of input features per time step.
    pub input_size: usize,
    /// Number of position channels produced per time step.
    pub output_size: usize,
    /// Worker threads used for batched prediction.
    pub multiprocessing_workers: usize,
    /// Maximum epochs per fit.
    pub num_epochs: usize,
    /// Consecutive non-improving epochs tolerated before stopping.
    pub early_stopping_patience: usize,
    /// Number of trials drawn by the random search.
    pub random_search_iterations: usize,
    /// Selects the diversified Sharpe monitor instead of validation-loss stopping.
    pub evaluate_diversified_val_sharpe: bool,
    /// When positive, only the last N steps of each window are scored.
    pub force_output_sharpe_length: usize,
    /// Optional cost rate charged on absolute position changes.
    pub transaction_costs: Option<f64>,
    /// Repeated fits per trial, averaged.
    pub executions_per_trial: usize,
    /// Minimum improvement for a new best epoch.
    pub min_delta: f64,
    /// Seed for search sampling and minibatch shuffling.
    pub seed: Option<u64>,
    /// Vocabulary sizes of trailing categorical input columns (attention variant).
    pub category_counts: Vec<usize>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            architecture: Architecture::Lstm,
            total_time_steps: 252,
            input_size: 1,
            output_size: 1,
            multiprocessing_workers: 32,
            num_epochs: 200,
            early_stopping_patience: 10,
            random_search_iterations: 20,
            evaluate_diversified_val_sharpe: false,
            force_output_sharpe_length: 0,
            transaction_costs: None,
            executions_per_trial: 1,
            min_delta: 1e-4,
            seed: None,
            category_counts: Vec::new(),
        }
    }
}

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and validates parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MomentumError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let params: ModelParams = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_total_time_steps(mut self, steps: usize) -> Self {
        self.total_time_steps = steps;
        self
    }

    pub fn with_input_size(mut self, size: usize) -> Self {
        self.input_size = size;
        self
    }

    pub fn with_output_size(mut self, size: usize) -> Self {
        self.output_size = size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.multiprocessing_workers = workers;
        self
    }

    pub fn with_num_epochs(mut self, epochs: usize) -> Self {
        self.num_epochs = epochs;
        self
    }

    pub fn with_early_stopping_patience(mut self, patience: usize) -> Self {
        self.early_stopping_patience = patience;
        self
    }

    pub fn with_random_search_iterations(mut self, iterations: usize) -> Self {
        self.random_search_iterations = iterations;
        self
    }

    pub fn with_diversified_val_sharpe(mut self, enabled: bool) -> Self {
        self.evaluate_diversified_val_sharpe = enabled;
        self
    }

    pub fn with_force_output_sharpe_length(mut self, length: usize) -> Self {
        self.force_output_sharpe_length = length;
        self
    }

    pub fn with_transaction_costs(mut self, rate: Option<f64>) -> Self {
        self.transaction_costs = rate;
        self
    }

    pub fn with_executions_per_trial(mut self, executions: usize) -> Self {
        self.executions_per_trial = executions;
        self
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_category_counts(mut self, counts: Vec<usize>) -> Self {
        self.category_counts = counts;
        self
    }

    /// Checks that the configuration describes a runnable search.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("total_time_steps", self.total_time_steps),
            ("input_size", self.input_size),
            ("output_size", self.output_size),
            ("multiprocessing_workers", self.multiprocessing_workers),
            ("num_epochs", self.num_epochs),
            ("random_search_iterations", self.random_search_iterations),
            ("executions_per_trial", self.executions_per_trial),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MomentumError::config(format!("{} must be > 0", name)));
            }
        }
        if self.force_output_sharpe_length > self.total_time_steps {
            return Err(MomentumError::config(format!(
                "force_output_sharpe_length ({}) exceeds total_time_steps ({})",
                self.force_output_sharpe_length, self.total_time_steps
            )));
        }
        if let Some(rate) = self.transaction_costs {
            if !rate.is_finite() || rate < 0.0 {
                return Err(MomentumError::config(format!(
                    "transaction_costs must be a non-negative finite rate, got {}",
                    rate
                )));
            }
        }
        if !self.min_delta.is_finite() || self.min_delta < 0.0 {
            return Err(MomentumError::config("min_delta must be >= 0"));
        }
        if self.category_counts.len() >= self.input_size && !self.category_counts.is_empty() {
            return Err(MomentumError::config(
                "category_counts must leave at least one continuous input column",
            ));
        }
        if self.category_counts.iter().any(|&c| c == 0) {
            return Err(MomentumError::config("category_counts entries must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let params = ModelParams::default();
        assert_eq!(params.total_time_steps, 252);
        assert_eq!(params.early_stopping_patience, 10);
        assert_eq!(params.multiprocessing_workers, 32);
        assert_eq!(params.num_epochs, 200);
        assert_eq!(params.random_search_iterations, 20);
        assert!(!params.evaluate_diversified_val_sharpe);
        assert_eq!(params.min_delta, 1e-4);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"architecture": "TRANSFORMER", "input_size": 8, "transaction_costs": 0.0002, "num_epochs": 5}}"#
        )
        .unwrap();
        let params = ModelParams::from_json_file(file.path()).unwrap();
        assert_eq!(params.architecture, Architecture::Transformer);
        assert_eq!(params.input_size, 8);
        assert_eq!(params.transaction_costs, Some(0.0002));
        assert_eq!(params.num_epochs, 5);
        assert_eq!(params.total_time_steps, 252);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ModelParams::new().with_num_epochs(0).validate().is_err());
        assert!(ModelParams::new()
            .with_transaction_costs(Some(-1.0))
            .validate()
            .is_err());
        assert!(ModelParams::new()
            .with_total_time_steps(10)
            .with_force_output_sharpe_length(11)
            .validate()
            .is_err());
        assert!(ModelParams::new()
            .with_input_size(2)
            .with_category_counts(vec![3, 4])
            .validate()
            .is_err());
    }

    #[test]
    fn test_architecture_parsing() {
        assert_eq!("lstm".parse::<Architecture>().unwrap(), Architecture::Lstm);
        assert_eq!(
            "Transformer".parse::<Architecture>().unwrap(),
            Architecture::Transformer
        );
        assert!("TFT".parse::<Architecture>().is_err());
        assert_eq!(Architecture::Transformer.to_string(), "TRANSFORMER");
    }
}
