//! Error types for the momentum core library.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for momentum-core operations.
#[derive(Debug, Error)]
pub enum MomentumError {
    /// Error during configuration parsing or validation.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// A description of the configuration error.
        message: String,
    },

    /// A hyperparameter was requested that the assignment does not contain.
    #[error("Unknown hyperparameter: {name}")]
    UnknownHyperparameter {
        /// Name of the missing hyperparameter.
        name: String,
    },

    /// A hyperparameter holds a value of a different kind than requested.
    #[error("Hyperparameter {name} is not a valid {expected}: {actual}")]
    HyperparameterType {
        /// Name of the hyperparameter.
        name: String,
        /// The kind that was requested.
        expected: &'static str,
        /// Debug rendering of the stored value.
        actual: String,
    },

    /// Error when tensors in a dataset disagree on their shapes.
    #[error("Shape mismatch in {field}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The offending dataset field.
        field: &'static str,
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Nested JSON arrays were not rectangular.
    #[error("Ragged array in {field}: {message}")]
    RaggedArray {
        /// The offending dataset field.
        field: &'static str,
        /// What was wrong.
        message: String,
    },

    /// I/O failure on a configuration or data file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File that could not be read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MomentumError {
    /// Shorthand for a [`MomentumError::ConfigError`].
    pub fn config(message: impl Into<String>) -> Self {
        MomentumError::ConfigError {
            message: message.into(),
        }
    }
}

/// A specialized Result type for momentum-core operations.
pub type Result<T> = std::result::Result<T, MomentumError>;
