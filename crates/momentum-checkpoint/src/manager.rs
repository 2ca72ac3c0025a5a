//! Single-location checkpoint management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::persist::Persist;
use crate::state::CheckpointState;
use crate::{CheckpointError, Result};

/// File name of the weights inside a checkpoint directory.
pub const WEIGHTS_FILE: &str = "weights.safetensors";

/// File name of the sidecar state inside a checkpoint directory.
pub const STATE_FILE: &str = "checkpoint.json";

/// Saves and restores the weights of one model at one checkpoint directory.
///
/// A manager belongs to a single training run; the directory is single-writer.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    last_saved: Option<CheckpointState>,
    metadata: BTreeMap<String, String>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_saved: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Annotation copied into the state of every save.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// True once weights exist at the current location.
    pub fn has_checkpoint(&self) -> bool {
        self.weights_path().exists()
    }

    pub fn last_saved(&self) -> Option<&CheckpointState> {
        self.last_saved.as_ref()
    }

    /// Starts a new run at the same location; earlier saves no longer count.
    pub fn forget(&mut self) {
        self.last_saved = None;
    }

    /// Persists `model` and writes the sidecar state.
    pub fn save<P: Persist + ?Sized>(
        &mut self,
        model: &P,
        epoch: usize,
        score: Option<f64>,
    ) -> Result<CheckpointState> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::io(&self.dir, e))?;
        let weights_path = self.weights_path();
        tracing::debug!(path = %weights_path.display(), epoch, "Saving weights");
        model.save_weights(&weights_path)?;

        let mut state = CheckpointState::new(epoch, weights_path);
        if let Some(score) = score {
            state = state.with_score(score);
        }
        for (key, value) in &self.metadata {
            state.set_metadata(key.clone(), value.clone());
        }
        state.write(&self.state_path())?;
        self.last_saved = Some(state.clone());
        Ok(state)
    }

    /// Loads the weights saved by this manager since the last [`forget`].
    ///
    /// Fails with [`CheckpointError::NotFound`] when this run saved nothing,
    /// even if another run left weights in the directory.
    ///
    /// [`forget`]: CheckpointManager::forget
    pub fn restore_saved<P: Persist + ?Sized>(&self, model: &mut P) -> Result<CheckpointState> {
        if self.last_saved.is_none() {
            return Err(CheckpointError::NotFound(self.weights_path()));
        }
        self.restore(model)
    }

    /// Loads whatever weights are saved in the directory into `model`.
    ///
    /// Fails with [`CheckpointError::NotFound`] when nothing was ever saved here.
    pub fn restore<P: Persist + ?Sized>(&self, model: &mut P) -> Result<CheckpointState> {
        let weights_path = self.weights_path();
        if !weights_path.exists() {
            return Err(CheckpointError::NotFound(weights_path));
        }
        let state = match CheckpointState::read(&self.state_path()) {
            Ok(state) => state,
            Err(CheckpointError::NotFound(_)) => CheckpointState::new(0, weights_path.clone()),
            Err(e) => return Err(e),
        };
        tracing::info!(path = %weights_path.display(), epoch = state.epoch, "Restoring weights");
        model.load_weights(&weights_path)?;
        Ok(state)
    }
}
