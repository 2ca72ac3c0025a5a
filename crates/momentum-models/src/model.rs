//! Model capability interface.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use momentum_checkpoint::Persist;
use momentum_core::{grid, HyperParameters, SearchSpace, SequenceDataset};

use crate::Result;

/// One minibatch of training cells.
#[derive(Debug, Clone)]
pub struct TrainBatch {
    /// `(batch, time, features)` inputs.
    pub inputs: Array3<f32>,
    /// `(batch, time, outputs)` realized returns.
    pub labels: Array3<f32>,
    /// `(batch, time)` sample weights; zero for padded cells.
    pub weights: Array2<f32>,
}

impl TrainBatch {
    /// Gathers the given samples; the active flags become the weights.
    pub fn from_dataset(data: &SequenceDataset, indices: &[usize]) -> Self {
        let batch = data.select(indices);
        let (inputs, labels, weights, _, _) = batch.unpack();
        Self {
            inputs: inputs.clone(),
            labels: labels.clone(),
            weights: weights.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory copy of every trainable variable, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    tensors: BTreeMap<String, (Vec<usize>, Vec<f32>)>,
}

impl WeightSnapshot {
    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) {
        self.tensors.insert(name.into(), (shape, values));
    }

    pub fn get(&self, name: &str) -> Option<(&[usize], &[f32])> {
        self.tensors
            .get(name)
            .map(|(shape, values)| (shape.as_slice(), values.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize], &[f32])> {
        self.tensors
            .iter()
            .map(|(k, (shape, values))| (k.as_str(), shape.as_slice(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// A trainable mapping from `(batch, time, features)` inputs to
/// `(batch, time, outputs)` positions.
///
/// Fitting is driven from outside, one [`TrainBatch`] at a time.
pub trait TradingModel: Persist + Send + Sync {
    fn name(&self) -> &str;

    /// The sample this model was built from.
    fn hyperparameters(&self) -> &HyperParameters;

    /// Inference-mode positions, computed in chunks over `workers` threads.
    fn predict(&self, inputs: &Array3<f32>, workers: usize) -> Result<Array3<f32>>;

    /// One optimizer step; returns the batch loss before the update.
    ///
    /// A non-finite loss is returned as-is and no update is applied.
    fn train_on_batch(&mut self, batch: &TrainBatch) -> Result<f64>;

    /// Loss over a whole partition, weighted by its active flags.
    fn evaluate(&self, data: &SequenceDataset, workers: usize) -> Result<f64>;

    /// Names of the values [`TradingModel::evaluate`] reports.
    fn metrics_names(&self) -> Vec<String> {
        vec!["loss".to_string()]
    }

    /// Copies the current weights into memory.
    fn snapshot(&self) -> Result<WeightSnapshot>;

    /// Overwrites the current weights with a snapshot.
    fn restore_snapshot(&mut self, snapshot: &WeightSnapshot) -> Result<()>;
}

/// Builds a fresh model from a hyperparameter sample.
pub trait ModelBuilder: Send + Sync {
    fn name(&self) -> &str {
        "model"
    }

    /// Searched dimensions, batch size excluded.
    fn search_space(&self) -> Result<SearchSpace> {
        Ok(SearchSpace::new()
            .with_choice("dropout_rate", grid::HP_DROPOUT_RATE.iter().copied())?
            .with_choice("learning_rate", grid::HP_LEARNING_RATE.iter().copied())?
            .with_choice("max_gradient_norm", grid::HP_MAX_GRADIENT_NORM.iter().copied())?)
    }

    /// Candidate minibatch sizes.
    fn batch_sizes(&self) -> Vec<i64> {
        grid::HP_MINIBATCH_SIZE.to_vec()
    }

    fn build(&self, hp: &HyperParameters) -> Result<Box<dyn TradingModel>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_train_batch_uses_active_flags_as_weights() {
        let data = SequenceDataset::new(
            Array3::zeros((3, 2, 1)),
            Array3::zeros((3, 2, 1)),
            array![[1.0, 1.0], [0.0, 1.0], [1.0, 0.0]],
            Array2::from_elem((3, 2), "A".to_string()),
            Array2::from_elem((3, 2), "d".to_string()),
        )
        .unwrap();
        let batch = TrainBatch::from_dataset(&data, &[2, 1]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.weights, array![[1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut snapshot = WeightSnapshot::default();
        snapshot.insert("head.weight", vec![1, 2], vec![0.5, -0.5]);
        let (shape, values) = snapshot.get("head.weight").unwrap();
        assert_eq!(shape, &[1, 2]);
        assert_eq!(values, &[0.5, -0.5]);
        assert_eq!(snapshot.iter().count(), 1);
        assert!(snapshot.get("missing").is_none());
    }
}
