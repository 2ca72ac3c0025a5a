//! Deterministic model and fixtures for unit tests.

use std::path::Path;

use ndarray::{Array2, Array3, Axis};

use momentum_checkpoint::{CheckpointError, Persist};
use momentum_core::{HyperParameters, SequenceDataset};
use momentum_models::{TradingModel, TrainBatch, WeightSnapshot};

/// Predicts `inputs[.., .., 0] + version`.
///
/// Training steps replay `losses` and move `version` along `schedule`;
/// `evaluate` reports `version` as the validation loss.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    hyperparameters: HyperParameters,
    version: f32,
    losses: Vec<f64>,
    schedule: Vec<f32>,
    steps: usize,
}

impl ScriptedModel {
    pub fn new(losses: Vec<f64>) -> Self {
        Self {
            hyperparameters: HyperParameters::default(),
            version: 0.0,
            losses,
            schedule: Vec::new(),
            steps: 0,
        }
    }

    pub fn with_schedule(mut self, schedule: Vec<f32>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_hyperparameters(mut self, hp: HyperParameters) -> Self {
        self.hyperparameters = hp;
        self
    }

    pub fn version(&self) -> f32 {
        self.version
    }

    pub fn set_version(&mut self, version: f32) {
        self.version = version;
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Persist for ScriptedModel {
    fn save_weights(&self, path: &Path) -> momentum_checkpoint::Result<()> {
        let json = serde_json::to_string(&self.version).map_err(CheckpointError::Serialization)?;
        std::fs::write(path, json).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_weights(&mut self, path: &Path) -> momentum_checkpoint::Result<()> {
        let json = std::fs::read_to_string(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.version = serde_json::from_str(&json).map_err(CheckpointError::Deserialization)?;
        Ok(())
    }
}

impl TradingModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn hyperparameters(&self) -> &HyperParameters {
        &self.hyperparameters
    }

    fn predict(&self, inputs: &Array3<f32>, _workers: usize) -> momentum_models::Result<Array3<f32>> {
        let signal = inputs.index_axis(Axis(2), 0).mapv(|x| x + self.version);
        Ok(signal.insert_axis(Axis(2)))
    }

    fn train_on_batch(&mut self, _batch: &TrainBatch) -> momentum_models::Result<f64> {
        let loss = self.losses.get(self.steps).copied().unwrap_or(-1.0);
        if let Some(version) = self.schedule.get(self.steps) {
            self.version = *version;
        }
        self.steps += 1;
        Ok(loss)
    }

    fn evaluate(&self, _data: &SequenceDataset, _workers: usize) -> momentum_models::Result<f64> {
        Ok(f64::from(self.version))
    }

    fn snapshot(&self) -> momentum_models::Result<WeightSnapshot> {
        let mut snapshot = WeightSnapshot::default();
        snapshot.insert("version", vec![1], vec![self.version]);
        Ok(snapshot)
    }

    fn restore_snapshot(&mut self, snapshot: &WeightSnapshot) -> momentum_models::Result<()> {
        let (_, values) = snapshot
            .get("version")
            .ok_or_else(|| momentum_models::ModelError::UnknownWeight("version".to_string()))?;
        self.version = values[0];
        Ok(())
    }
}

/// One instrument per row, one date per column; inputs equal the returns.
pub fn peeking_dataset<const T: usize>(rows: &[[f64; T]]) -> SequenceDataset {
    let n = rows.len();
    let returns = Array3::from_shape_fn((n, T, 1), |(i, j, _)| rows[i][j] as f32);
    SequenceDataset::new(
        returns.clone(),
        returns,
        Array2::ones((n, T)),
        Array2::from_shape_fn((n, T), |(i, _)| format!("I{}", i)),
        Array2::from_shape_fn((n, T), |(_, j)| format!("2020-01-{:02}", j + 1)),
    )
    .unwrap()
}

/// Builds [`ScriptedModel`]s whose version is the sampled `offset`.
///
/// Models built for `failing_offset` report a NaN loss on their first step.
#[derive(Debug, Clone)]
pub struct ScriptedBuilder {
    space: momentum_core::SearchSpace,
    failing_offset: Option<f64>,
}

impl ScriptedBuilder {
    pub fn new(space: momentum_core::SearchSpace) -> Self {
        Self {
            space,
            failing_offset: None,
        }
    }

    pub fn with_failing_offset(mut self, offset: f64) -> Self {
        self.failing_offset = Some(offset);
        self
    }
}

impl momentum_models::ModelBuilder for ScriptedBuilder {
    fn name(&self) -> &str {
        "scripted"
    }

    fn search_space(&self) -> momentum_models::Result<momentum_core::SearchSpace> {
        Ok(self.space.clone())
    }

    fn batch_sizes(&self) -> Vec<i64> {
        vec![8]
    }

    fn build(&self, hp: &HyperParameters) -> momentum_models::Result<Box<dyn TradingModel>> {
        let offset = hp.get_float("offset")?;
        let losses = if self.failing_offset == Some(offset) {
            vec![f64::NAN]
        } else {
            vec![]
        };
        let model = ScriptedModel::new(losses)
            .with_schedule(vec![offset as f32; 64])
            .with_hyperparameters(hp.clone());
        Ok(Box::new(model))
    }
}
