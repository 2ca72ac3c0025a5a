//! Trainable sequence-to-position models.
//!
//! Everything above this crate depends only on the [`TradingModel`] capability set
//! (predict, train one batch, evaluate, persist weights) and on [`ModelBuilder`],
//! which turns a hyperparameter sample into a fresh model. Two builders ship here:
//!
//! - [`LstmModelBuilder`]: one LSTM layer, dropout and a time-distributed tanh head.
//! - [`AttentionModelBuilder`]: a causal self-attention encoder with optional
//!   categorical asset embeddings and a sigmoid head.
//!
//! Both are backed by [`CandleTradingModel`], which trains against the weighted
//! Sharpe objective with Adam and per-variable gradient norm clipping.

pub mod attention;
pub mod candle_model;
pub mod lstm;
pub mod model;
pub mod registry;

pub use attention::{AttentionModelBuilder, AttentionNetwork};
pub use candle_model::{CandleTradingModel, OptimizerSettings, SequenceNetwork};
pub use lstm::{LstmModelBuilder, LstmNetwork};
pub use model::{ModelBuilder, TradingModel, TrainBatch, WeightSnapshot};
pub use registry::builder_for;

use momentum_checkpoint::CheckpointError;
use momentum_core::MomentumError;
use momentum_tensor::TensorError;
use thiserror::Error;

/// Errors raised while building, training or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Error raised by the candle runtime.
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Error from the objective or array conversions.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Bad or missing hyperparameter.
    #[error(transparent)]
    Config(#[from] MomentumError),

    /// Weights could not be saved or loaded.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Inputs whose shape the model cannot consume.
    #[error("Invalid input shape: expected {expected:?}, got {actual:?}")]
    InvalidInput {
        /// Expected shape; zero marks a free dimension.
        expected: Vec<usize>,
        /// Shape received.
        actual: Vec<usize>,
    },

    /// A snapshot names a variable the model does not have.
    #[error("Unknown weight: {0}")]
    UnknownWeight(String),

    /// Internal variable store lock was poisoned.
    #[error("Variable store is poisoned")]
    Poisoned,

    /// The prediction worker pool could not be created.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
