//! Numerical building blocks of the Sharpe training engine.
//!
//! # Overview
//!
//! - [`SharpeLoss`]: the differentiable negative Sharpe objective over candle tensors,
//!   with an optional per-cell weight mask.
//! - [`sharpe`]: plain `f64` Sharpe statistics used for monitoring and backtests.
//! - [`ops`]: segment means and turnover over materialized arrays.
//! - [`candle_backend`]: conversions between `ndarray` arrays and candle tensors.
//!
//! # Example
//!
//! ```rust
//! use momentum_tensor::sharpe::{diversified_sharpe, StabilityConfig};
//!
//! let portfolio = [0.015, 0.0, 0.005];
//! let sharpe = diversified_sharpe(&portfolio, &StabilityConfig::default());
//! assert!(sharpe > 0.0);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod candle_backend;
pub mod objective;
pub mod ops;
pub mod sharpe;

pub use candle_backend::{array2_to_tensor, array3_to_tensor, best_device, tensor_to_array3};
pub use candle_core::Device;
pub use objective::SharpeLoss;
pub use sharpe::StabilityConfig;

/// Error types for tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// Shape mismatch error.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        got: Vec<usize>,
    },

    /// A segment id fell outside `0..num_segments`.
    #[error("Segment id {id} out of range for {num_segments} segments")]
    SegmentOutOfRange {
        /// The offending id.
        id: usize,
        /// Number of segments requested.
        num_segments: usize,
    },

    /// Error raised by the candle runtime.
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type for tensor operations.
pub type Result<T> = std::result::Result<T, TensorError>;
