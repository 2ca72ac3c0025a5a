//! On-disk layout of a hyperparameter search project.
//!
//! ```text
//! <directory>/<project_name>/
//!     oracle.json
//!     trial_<id>/
//!         trial.json
//!         checkpoint_<step>/
//! ```

use std::path::{Path, PathBuf};

use crate::{CheckpointError, Result};

/// Derives every path a search writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    directory: PathBuf,
    project_name: String,
}

impl ProjectLayout {
    pub fn new(directory: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            project_name: project_name.into(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn project_dir(&self) -> PathBuf {
        self.directory.join(&self.project_name)
    }

    pub fn oracle_path(&self) -> PathBuf {
        self.project_dir().join("oracle.json")
    }

    pub fn trial_dir(&self, trial_id: &str) -> PathBuf {
        self.project_dir().join(format!("trial_{}", trial_id))
    }

    pub fn trial_record_path(&self, trial_id: &str) -> PathBuf {
        self.trial_dir(trial_id).join("trial.json")
    }

    /// Checkpoint location for one trial at one reporting step.
    pub fn checkpoint_dir(&self, trial_id: &str, step: u64) -> PathBuf {
        self.trial_dir(trial_id).join(format!("checkpoint_{}", step))
    }

    /// Creates the project directory.
    pub fn create(&self) -> Result<PathBuf> {
        let dir = self.project_dir();
        ensure_dir(&dir)?;
        Ok(dir)
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))
}
