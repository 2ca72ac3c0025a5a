//! Sidecar metadata written next to saved weights.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CheckpointError, Result};

/// What was saved, when, and at which score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Zero-based epoch at which the weights were saved.
    pub epoch: usize,
    /// Monitored score at save time, if any.
    pub score: Option<f64>,
    /// Weights file.
    pub weights_path: PathBuf,
    /// Wall-clock save time.
    pub saved_at: DateTime<Utc>,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckpointState {
    pub fn new(epoch: usize, weights_path: impl Into<PathBuf>) -> Self {
        Self {
            epoch,
            score: None,
            weights_path: weights_path.into(),
            saved_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Writes the state as pretty JSON.
    ///
    /// Non-finite scores are stored as `null`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut state = self.clone();
        state.score = state.score.filter(|s| s.is_finite());
        let json = serde_json::to_string_pretty(&state).map_err(CheckpointError::Serialization)?;
        std::fs::write(path, json).map_err(|e| CheckpointError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path).map_err(|e| CheckpointError::io(path, e))?;
        serde_json::from_str(&json).map_err(CheckpointError::Deserialization)
    }
}
