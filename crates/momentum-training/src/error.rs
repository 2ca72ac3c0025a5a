//! Error type of the training engine.

use std::path::PathBuf;

use momentum_checkpoint::CheckpointError;
use momentum_core::MomentumError;
use momentum_models::ModelError;
use momentum_tensor::TensorError;
use thiserror::Error;

use crate::hooks::HookError;
use crate::monitor::MonitorState;

/// Errors raised while training, searching or evaluating.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// A batch produced a NaN or infinite loss; the run is abandoned.
    #[error("Non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        epoch: usize,
        batch: usize,
        loss: f64,
    },

    /// A timestamp label was never assigned an index.
    #[error("Time label {label:?} has no assigned index")]
    UnknownTimeLabel { label: String },

    /// A timestamp label could not be parsed as a date.
    #[error("Invalid timestamp {label:?}")]
    InvalidTimestamp { label: String },

    /// The validation monitor was advanced outside a training run.
    #[error("Monitor is {state:?}, expected Running")]
    MonitorNotRunning { state: MonitorState },

    /// Every execution of a trial failed.
    #[error("Trial {trial_id} failed: {reason}")]
    TrialFailed { trial_id: String, reason: String },

    /// The search finished without a usable trial.
    #[error("No trial completed successfully")]
    NoSuccessfulTrials,

    /// Inconsistent training configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Core(#[from] MomentumError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainingError>;
