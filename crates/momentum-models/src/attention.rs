//! Causal self-attention position network.
//!
//! Continuous inputs are projected to the model width, trailing categorical
//! columns (asset ids, classes) are embedded and added, and a sinusoidal
//! position code is mixed in. A stack of pre-norm encoder blocks with causal
//! masking follows, and a dense sigmoid head emits one score per channel.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Embedding, LayerNorm, Linear, Module, VarBuilder, VarMap};

use momentum_core::{grid, HyperParameters, ModelParams, SearchSpace};
use momentum_tensor::StabilityConfig;

use crate::candle_model::{dropout, CandleTradingModel, OptimizerSettings, SequenceNetwork};
use crate::model::{ModelBuilder, TradingModel};
use crate::{ModelError, Result};

const LAYER_NORM_EPS: f64 = 1e-6;

/// Shape of an [`AttentionNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    pub input_size: usize,
    pub output_size: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub ff_dim: usize,
    pub dropout_rate: f32,
    /// Vocabulary sizes of the trailing categorical input columns.
    pub category_counts: Vec<usize>,
}

struct EncoderBlock {
    attn_norm: LayerNorm,
    qkv: Linear,
    proj: Linear,
    ff_norm: LayerNorm,
    ff_in: Linear,
    ff_out: Linear,
    num_heads: usize,
    dropout_rate: f32,
}

impl EncoderBlock {
    fn new(config: &AttentionConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let d = config.d_model;
        Ok(Self {
            attn_norm: candle_nn::layer_norm(d, LAYER_NORM_EPS, vb.pp("attn_norm"))?,
            qkv: candle_nn::linear(d, 3 * d, vb.pp("qkv"))?,
            proj: candle_nn::linear(d, d, vb.pp("proj"))?,
            ff_norm: candle_nn::layer_norm(d, LAYER_NORM_EPS, vb.pp("ff_norm"))?,
            ff_in: candle_nn::linear(d, config.ff_dim, vb.pp("ff_in"))?,
            ff_out: candle_nn::linear(config.ff_dim, d, vb.pp("ff_out"))?,
            num_heads: config.num_heads,
            dropout_rate: config.dropout_rate,
        })
    }

    fn self_attention(&self, xs: &Tensor, mask: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let (b, t, d) = xs.dims3()?;
        let head_dim = d / self.num_heads;
        let qkv = self.qkv.forward(xs)?;
        let split = |offset: usize| -> candle_core::Result<Tensor> {
            qkv.narrow(D::Minus1, offset, d)?
                .reshape((b, t, self.num_heads, head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let (q, k, v) = (split(0)?, split(d)?, split(2 * d)?);

        let scores = (q.matmul(&k.t()?.contiguous()?)? / (head_dim as f64).sqrt())?;
        let scores = scores.broadcast_add(mask)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let weights = dropout(&weights, self.dropout_rate, train)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, d))?;
        self.proj.forward(&context)
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let attended = self.self_attention(&self.attn_norm.forward(xs)?, mask, train)?;
        let residual = (dropout(&attended, self.dropout_rate, train)? + xs)?;

        let hidden = self.ff_in.forward(&self.ff_norm.forward(&residual)?)?.relu()?;
        let hidden = dropout(&hidden, self.dropout_rate, train)?;
        self.ff_out.forward(&hidden)? + residual
    }
}

/// Encoder-only attention network emitting sigmoid scores.
pub struct AttentionNetwork {
    input_proj: Linear,
    embeddings: Vec<(usize, Embedding)>,
    blocks: Vec<EncoderBlock>,
    final_norm: LayerNorm,
    head: Linear,
    continuous: usize,
    d_model: usize,
    dropout_rate: f32,
}

impl AttentionNetwork {
    pub fn new(config: &AttentionConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_heads == 0 || config.d_model % config.num_heads != 0 {
            return Err(ModelError::Config(momentum_core::MomentumError::config(format!(
                "d_model ({}) must be a multiple of num_heads ({})",
                config.d_model, config.num_heads
            ))));
        }
        let continuous = config
            .input_size
            .checked_sub(config.category_counts.len())
            .filter(|c| *c > 0)
            .ok_or_else(|| ModelError::InvalidInput {
                expected: vec![0, 0, config.category_counts.len() + 1],
                actual: vec![0, 0, config.input_size],
            })?;

        let input_proj = candle_nn::linear(continuous, config.d_model, vb.pp("input_proj"))?;
        let embeddings = config
            .category_counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                candle_nn::embedding(count, config.d_model, vb.pp(format!("embedding_{}", i)))
                    .map(|e| (count, e))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let blocks = (0..config.num_layers)
            .map(|i| EncoderBlock::new(config, vb.pp(format!("block_{}", i))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            input_proj,
            embeddings,
            blocks,
            final_norm: candle_nn::layer_norm(config.d_model, LAYER_NORM_EPS, vb.pp("final_norm"))?,
            head: candle_nn::linear(config.d_model, config.output_size, vb.pp("head"))?,
            continuous,
            d_model: config.d_model,
            dropout_rate: config.dropout_rate,
        })
    }

    fn embed(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut hidden = self.input_proj.forward(&xs.narrow(D::Minus1, 0, self.continuous)?)?;
        for (i, (count, embedding)) in self.embeddings.iter().enumerate() {
            let ids = xs
                .narrow(D::Minus1, self.continuous + i, 1)?
                .squeeze(D::Minus1)?
                .clamp(0f32, (*count - 1) as f32)?
                .to_dtype(DType::U32)?;
            hidden = (hidden + embedding.forward(&ids)?)?;
        }
        let (_, t, _) = hidden.dims3()?;
        hidden.broadcast_add(&positional_encoding(t, self.d_model, xs.device())?)
    }
}

impl SequenceNetwork for AttentionNetwork {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut hidden = dropout(&self.embed(xs)?, self.dropout_rate, train)?;
        let (_, t, _) = hidden.dims3()?;
        let mask = causal_mask(t, xs.device())?;
        for block in &self.blocks {
            hidden = block.forward(&hidden, &mask, train)?;
        }
        let hidden = self.final_norm.forward(&hidden)?;
        candle_nn::ops::sigmoid(&self.head.forward(&hidden)?)
    }
}

/// `(t, t)` additive mask hiding future steps.
fn causal_mask(t: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<f32> = (0..t)
        .flat_map(|i| (0..t).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (t, t), device)
}

fn positional_encoding(t: usize, d: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mut data = vec![0f32; t * d];
    for pos in 0..t {
        for i in 0..d {
            let rate = 10000f64.powf((2 * (i / 2)) as f64 / d as f64);
            let angle = pos as f64 / rate;
            data[pos * d + i] = if i % 2 == 0 { angle.sin() } else { angle.cos() } as f32;
        }
    }
    Tensor::from_vec(data, (t, d), device)
}

/// Builds [`AttentionNetwork`] models from samples of `num_heads`, `num_layers`,
/// `d_model`, `ff_dim`, `dropout_rate`, `learning_rate` and `max_gradient_norm`.
#[derive(Debug, Clone)]
pub struct AttentionModelBuilder {
    input_size: usize,
    output_size: usize,
    force_output_sharpe_length: usize,
    category_counts: Vec<usize>,
    stability: StabilityConfig,
    device: Device,
}

impl AttentionModelBuilder {
    pub fn new(params: &ModelParams) -> Self {
        Self {
            input_size: params.input_size,
            output_size: params.output_size,
            force_output_sharpe_length: params.force_output_sharpe_length,
            category_counts: params.category_counts.clone(),
            stability: StabilityConfig::default(),
            device: momentum_tensor::best_device(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }
}

impl ModelBuilder for AttentionModelBuilder {
    fn name(&self) -> &str {
        "attention"
    }

    fn search_space(&self) -> Result<SearchSpace> {
        Ok(SearchSpace::new()
            .with_choice("no_heads", grid::HP_NUM_HEADS.iter().copied())?
            .with_choice("no_layers", grid::HP_NUM_LAYERS.iter().copied())?
            .with_choice("dq", grid::HP_MODEL_DIM.iter().copied())?
            .with_choice("ff_dim", grid::HP_FF_DIM.iter().copied())?
            .with_choice("dropout_rate", grid::HP_DROPOUT_RATE.iter().copied())?
            .with_choice("learning_rate", grid::HP_LEARNING_RATE.iter().copied())?
            .with_choice("max_gradient_norm", grid::HP_MAX_GRADIENT_NORM.iter().copied())?)
    }

    fn batch_sizes(&self) -> Vec<i64> {
        grid::HP_ATTENTION_MINIBATCH_SIZE.to_vec()
    }

    fn build(&self, hp: &HyperParameters) -> Result<Box<dyn TradingModel>> {
        let config = AttentionConfig {
            input_size: self.input_size,
            output_size: self.output_size,
            d_model: hp.get_usize("dq")?,
            num_heads: hp.get_usize("no_heads")?,
            num_layers: hp.get_usize("no_layers")?,
            ff_dim: hp.get_usize("ff_dim")?,
            dropout_rate: hp.get_float("dropout_rate")? as f32,
            category_counts: self.category_counts.clone(),
        };
        let settings = OptimizerSettings::from_hyperparameters(hp, self.output_size)?
            .with_force_output_sharpe_length(self.force_output_sharpe_length)
            .with_stability(self.stability);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let network = AttentionNetwork::new(&config, vb)?;
        tracing::debug!(?config, "Built attention network");
        let model = CandleTradingModel::new(
            "attention",
            hp.clone(),
            varmap,
            Box::new(network),
            self.input_size,
            settings,
            self.device.clone(),
        )?;
        Ok(Box::new(model))
    }
}
