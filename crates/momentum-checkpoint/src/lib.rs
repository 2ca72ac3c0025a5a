//! Weights checkpointing for momentum models.
//!
//! This crate provides:
//!
//! - **Persistence protocol**: [`Persist`] is implemented by anything that can write its
//!   weights to a path and read them back. The file format belongs to the implementor.
//! - **Checkpoint management**: [`CheckpointManager`] owns one checkpoint location, writes
//!   weights plus a JSON sidecar ([`CheckpointState`]) and restores them on request.
//! - **Project layout**: [`ProjectLayout`] derives trial directories and per-trial, per-step
//!   checkpoint locations so successive trials never overwrite each other.
//!
//! # Example
//!
//! ```no_run
//! use momentum_checkpoint::{CheckpointManager, ProjectLayout};
//!
//! let layout = ProjectLayout::new("/tmp/hp", "lstm_search");
//! let manager = CheckpointManager::new(layout.checkpoint_dir("0007", 3));
//! assert!(!manager.has_checkpoint());
//! ```

pub mod layout;
pub mod manager;
pub mod persist;
pub mod state;

pub use layout::ProjectLayout;
pub use manager::CheckpointManager;
pub use persist::Persist;
pub use state::CheckpointState;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O error during checkpoint operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No checkpoint has been written at this location.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// Error during serialization.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Error during deserialization.
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// The model runtime failed to write or read its weights.
    #[error("Weights error at {path}: {message}")]
    Weights {
        /// Weights file involved.
        path: PathBuf,
        /// Runtime error message.
        message: String,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
