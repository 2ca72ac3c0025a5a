//! Candle-backed implementation of [`TradingModel`].
//!
//! A [`SequenceNetwork`] supplies the forward pass; [`CandleTradingModel`] owns the
//! variable store, the optimizer and the objective, and turns the network into
//! something the trainer can fit, checkpoint and query.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use ndarray::{s, Array3, Axis};
use rayon::prelude::*;

use momentum_checkpoint::{CheckpointError, Persist};
use momentum_core::{HyperParameters, SequenceDataset};
use momentum_tensor::candle_backend::scalar_to_f64;
use momentum_tensor::ops::mask_leading_steps;
use momentum_tensor::{array2_to_tensor, array3_to_tensor, tensor_to_array3, SharpeLoss, StabilityConfig};

use crate::model::{TradingModel, TrainBatch, WeightSnapshot};
use crate::{ModelError, Result};

/// Samples per prediction chunk.
const PREDICT_CHUNK: usize = 256;

/// Forward pass of a position network.
pub trait SequenceNetwork: Send + Sync {
    /// Maps `(batch, time, features)` to `(batch, time, outputs)`.
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor>;

    /// Re-applies weight constraints after an optimizer step.
    fn apply_constraints(&self) -> candle_core::Result<()> {
        Ok(())
    }
}

/// Optimizer and objective settings of one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub learning_rate: f64,
    /// Per-variable gradient norm cap; non-positive disables clipping.
    pub max_gradient_norm: f64,
    pub output_size: usize,
    /// When positive, only the last N steps of a window are scored.
    pub force_output_sharpe_length: usize,
    pub stability: StabilityConfig,
}

impl OptimizerSettings {
    /// Reads `learning_rate` and `max_gradient_norm` from a sample.
    pub fn from_hyperparameters(hp: &HyperParameters, output_size: usize) -> Result<Self> {
        Ok(Self {
            learning_rate: hp.get_float("learning_rate")?,
            max_gradient_norm: hp.get_float("max_gradient_norm")?,
            output_size,
            force_output_sharpe_length: 0,
            stability: StabilityConfig::default(),
        })
    }

    pub fn with_force_output_sharpe_length(mut self, length: usize) -> Self {
        self.force_output_sharpe_length = length;
        self
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }
}

/// Prediction thread pools, built once per worker count.
#[derive(Debug, Default)]
pub(crate) struct WorkerPools {
    pools: Mutex<HashMap<usize, Arc<rayon::ThreadPool>>>,
}

impl WorkerPools {
    pub(crate) fn get(&self, workers: usize) -> Result<Arc<rayon::ThreadPool>> {
        let workers = workers.max(1);
        let mut pools = self.pools.lock().map_err(|_| ModelError::Poisoned)?;
        if let Some(pool) = pools.get(&workers) {
            return Ok(Arc::clone(pool));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ModelError::WorkerPool(e.to_string()))?;
        let pool = Arc::new(pool);
        pools.insert(workers, Arc::clone(&pool));
        Ok(pool)
    }
}

/// A [`SequenceNetwork`] together with its variables and optimizer.
pub struct CandleTradingModel {
    name: String,
    hyperparameters: HyperParameters,
    varmap: VarMap,
    network: Box<dyn SequenceNetwork>,
    optimizer: AdamW,
    settings: OptimizerSettings,
    loss: SharpeLoss,
    input_size: usize,
    device: Device,
    pools: WorkerPools,
}

impl CandleTradingModel {
    /// Wraps a network whose variables all live in `varmap`.
    pub fn new(
        name: impl Into<String>,
        hyperparameters: HyperParameters,
        varmap: VarMap,
        network: Box<dyn SequenceNetwork>,
        input_size: usize,
        settings: OptimizerSettings,
        device: Device,
    ) -> Result<Self> {
        let params = ParamsAdamW {
            lr: settings.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        let loss = SharpeLoss::new(settings.output_size).with_stability(settings.stability);
        Ok(Self {
            name: name.into(),
            hyperparameters,
            varmap,
            network,
            optimizer,
            settings,
            loss,
            input_size,
            device,
            pools: WorkerPools::default(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    fn check_inputs(&self, inputs: &Array3<f32>) -> Result<()> {
        if inputs.dim().2 != self.input_size {
            return Err(ModelError::InvalidInput {
                expected: vec![0, 0, self.input_size],
                actual: inputs.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn forward_array(&self, inputs: &Array3<f32>) -> Result<Array3<f32>> {
        let xs = array3_to_tensor(inputs, &self.device)?;
        let ys = self.network.forward_t(&xs, false)?;
        Ok(tensor_to_array3(&ys)?)
    }

    fn score_weights(&self, weights: &ndarray::Array2<f32>) -> ndarray::Array2<f32> {
        let mut weights = weights.clone();
        mask_leading_steps(&mut weights, self.settings.force_output_sharpe_length);
        weights
    }
}

/// Scales each variable's gradient down to at most `max_norm`.
fn clip_gradients(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> candle_core::Result<()> {
    if !(max_norm.is_finite() && max_norm > 0.0) {
        return Ok(());
    }
    for var in vars {
        let Some(grad) = grads.get(var.as_tensor()) else {
            continue;
        };
        let norm = grad
            .sqr()?
            .sum_all()?
            .to_dtype(DType::F64)?
            .to_scalar::<f64>()?
            .sqrt();
        if norm > max_norm {
            let clipped = grad.affine(max_norm / norm, 0.0)?;
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(())
}

/// Rescales the rows of `var` so each has an L2 norm of at most `max_value`.
pub(crate) fn apply_max_norm(var: &Var, max_value: f64) -> candle_core::Result<()> {
    let w = var.as_tensor();
    let norms = w.sqr()?.sum_keepdim(1)?.sqrt()?;
    let desired = norms.clamp(0f32, max_value as f32)?;
    let scale = desired.div(&(norms + 1e-7)?)?;
    var.set(&w.broadcast_mul(&scale)?)
}

/// Looks up a variable created through a `VarBuilder` backed by `varmap`.
pub(crate) fn lookup_var(varmap: &VarMap, name: &str) -> Result<Var> {
    let data = varmap.data().lock().map_err(|_| ModelError::Poisoned)?;
    data.get(name)
        .cloned()
        .ok_or_else(|| ModelError::UnknownWeight(name.to_string()))
}

/// Inference-time dropout is the identity.
pub(crate) fn dropout(xs: &Tensor, rate: f32, train: bool) -> candle_core::Result<Tensor> {
    if train && rate > 0.0 {
        candle_nn::ops::dropout(xs, rate)
    } else {
        Ok(xs.clone())
    }
}

impl TradingModel for CandleTradingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn hyperparameters(&self) -> &HyperParameters {
        &self.hyperparameters
    }

    fn predict(&self, inputs: &Array3<f32>, workers: usize) -> Result<Array3<f32>> {
        self.check_inputs(inputs)?;
        let (n, t, _) = inputs.dim();
        if n == 0 {
            return Ok(Array3::zeros((0, t, self.settings.output_size)));
        }
        let starts: Vec<usize> = (0..n).step_by(PREDICT_CHUNK).collect();
        let pool = self.pools.get(workers)?;
        let chunks = pool.install(|| {
            starts
                .par_iter()
                .map(|&start| {
                    let end = (start + PREDICT_CHUNK).min(n);
                    let chunk = inputs.slice(s![start..end, .., ..]).to_owned();
                    self.forward_array(&chunk)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
        ndarray::concatenate(Axis(0), &views).map_err(|_| ModelError::InvalidInput {
            expected: vec![n, t, self.settings.output_size],
            actual: chunks.first().map(|c| c.shape().to_vec()).unwrap_or_default(),
        })
    }

    fn train_on_batch(&mut self, batch: &TrainBatch) -> Result<f64> {
        self.check_inputs(&batch.inputs)?;
        let xs = array3_to_tensor(&batch.inputs, &self.device)?;
        let ys = array3_to_tensor(&batch.labels, &self.device)?;
        let ws = array2_to_tensor(&self.score_weights(&batch.weights), &self.device)?;

        let positions = self.network.forward_t(&xs, true)?;
        let loss = self.loss.weighted(&positions, &ys, &ws)?;
        let value = scalar_to_f64(&loss)?;
        if !value.is_finite() {
            return Ok(value);
        }

        let mut grads = loss.backward()?;
        clip_gradients(&mut grads, &self.varmap.all_vars(), self.settings.max_gradient_norm)?;
        self.optimizer.step(&grads)?;
        self.network.apply_constraints()?;
        Ok(value)
    }

    fn evaluate(&self, data: &SequenceDataset, workers: usize) -> Result<f64> {
        let (inputs, labels, active, _, _) = data.unpack();
        let positions = self.predict(inputs, workers)?;
        let positions = array3_to_tensor(&positions, &self.device)?;
        let ys = array3_to_tensor(labels, &self.device)?;
        let ws = array2_to_tensor(&self.score_weights(active), &self.device)?;
        let loss = self.loss.weighted(&positions, &ys, &ws)?;
        Ok(scalar_to_f64(&loss)?)
    }

    fn snapshot(&self) -> Result<WeightSnapshot> {
        let data = self.varmap.data().lock().map_err(|_| ModelError::Poisoned)?;
        let mut snapshot = WeightSnapshot::default();
        for (name, var) in data.iter() {
            let values = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
            snapshot.insert(name.clone(), var.dims().to_vec(), values);
        }
        Ok(snapshot)
    }

    fn restore_snapshot(&mut self, snapshot: &WeightSnapshot) -> Result<()> {
        let data = self.varmap.data().lock().map_err(|_| ModelError::Poisoned)?;
        for (name, shape, values) in snapshot.iter() {
            let var = data
                .get(name)
                .ok_or_else(|| ModelError::UnknownWeight(name.to_string()))?;
            let tensor = Tensor::from_vec(values.to_vec(), shape, &self.device)?;
            var.set(&tensor)?;
        }
        Ok(())
    }
}

impl Persist for CandleTradingModel {
    fn save_weights(&self, path: &Path) -> momentum_checkpoint::Result<()> {
        self.varmap
            .save(path)
            .map_err(|e| CheckpointError::Weights {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn load_weights(&mut self, path: &Path) -> momentum_checkpoint::Result<()> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        self.varmap
            .load(path)
            .map_err(|e| CheckpointError::Weights {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }
}
